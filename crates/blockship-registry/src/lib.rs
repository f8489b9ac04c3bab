//! Registry API client for blockship.
//!
//! The publish pipeline talks to the registry through [`RegistryApi`]: a
//! two-phase reserve/commit protocol (with abort as the rollback edge) plus
//! version lookups. [`RegistryClient`] implements it over blocking HTTP with
//! JSON bodies and bearer authentication.
//!
//! | call | request |
//! |---|---|
//! | reserve | `POST {base}/reserve` |
//! | commit | `POST {base}/publish` with `If-Match: <reservation id>` |
//! | abort | `DELETE {base}/reservations/{id}` |
//! | lookup | `GET {base}/{handle}/{name}/{version}` |
//! | previous | `GET {base}/{handle}/{name}/{version}/previous` |

use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use blockship_auth::TokenProvider;
use blockship_types::{AssetDefinition, AssetVersion, Reservation, split_full_name};
use reqwest::StatusCode;
use reqwest::Url;
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};

/// Default timeout for API requests
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Default user agent for API requests
pub const USER_AGENT: &str = concat!("blockship/", env!("CARGO_PKG_VERSION"));

/// Body of the reserve call: every asset of one push plus its VCS context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReserveRequest {
    pub assets: Vec<AssetDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default)]
    pub main_branch: bool,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
}

/// What the publish pipeline needs from a registry.
pub trait RegistryApi {
    /// Base URL, for messages and for handlers that derive artifact registries from it.
    fn base_url(&self) -> &str;

    /// Reserve versions for every asset in the request. `None` when the
    /// registry returned nothing.
    fn reserve(&self, request: &ReserveRequest) -> Result<Option<Reservation>>;

    /// Durably publish `versions` under the reservation.
    fn commit(&self, reservation_id: &str, versions: &[AssetVersion]) -> Result<()>;

    /// Release the reservation.
    fn abort(&self, reservation_id: &str) -> Result<()>;

    /// `full_name` is `handle/name`. `None` when not registered.
    fn get_version(&self, full_name: &str, version: &str) -> Result<Option<AssetVersion>>;

    /// Latest registered version strictly before `version`.
    fn get_latest_version_before(&self, full_name: &str, version: &str) -> Result<Option<AssetVersion>>;
}

/// Registry API client
pub struct RegistryClient {
    base_url: String,
    auth: Box<dyn TokenProvider + Send + Sync>,
    client: Client,
}

impl std::fmt::Debug for RegistryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryClient")
            .field("base_url", &self.base_url)
            .field("authenticated", &self.auth.has_credentials())
            .finish()
    }
}

impl RegistryClient {
    pub fn new(base_url: &str, auth: Box<dyn TokenProvider + Send + Sync>) -> Result<Self> {
        Url::parse(base_url).with_context(|| format!("invalid registry url: {base_url}"))?;
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            auth,
            client,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url =
            Url::parse(&self.base_url).with_context(|| format!("invalid registry url: {}", self.base_url))?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("registry url cannot be a base: {}", self.base_url))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn asset_endpoint(&self, full_name: &str, version: &str, suffix: Option<&str>) -> Result<Url> {
        let (handle, name) = split_full_name(full_name)?;
        let mut segments = vec![handle, name, version];
        segments.extend(suffix);
        self.endpoint(&segments)
    }

    /// Send with auth; 404 becomes `None`, error bodies surface their message.
    fn send(&self, request: RequestBuilder) -> Result<Option<Response>> {
        let request = if self.auth.has_credentials() {
            request.bearer_auth(self.auth.token()?)
        } else {
            request
        };

        let response = match request.header(reqwest::header::ACCEPT, "application/json").send() {
            Ok(response) => response,
            Err(err) if err.is_connect() => bail!(
                "Failed to reach registry at {}. Please check your settings and try again.",
                self.base_url
            ),
            Err(err) => return Err(err).context("registry request failed"),
        };

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if status.is_success() {
            return Ok(Some(response));
        }

        let body = response.text().unwrap_or_default();
        if let Ok(ErrorBody {
            message: Some(message),
        }) = serde_json::from_str::<ErrorBody>(&body)
        {
            bail!("{message}");
        }
        bail!("registry responded with {status}: {}", body.trim())
    }

    fn get_json<T: for<'de> Deserialize<'de>>(&self, url: Url) -> Result<Option<T>> {
        let Some(response) = self.send(self.client.get(url.clone()))? else {
            return Ok(None);
        };
        let parsed = response
            .json()
            .with_context(|| format!("failed to parse registry response from {url}"))?;
        Ok(Some(parsed))
    }
}

impl RegistryApi for RegistryClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    fn reserve(&self, request: &ReserveRequest) -> Result<Option<Reservation>> {
        let url = self.endpoint(&["reserve"])?;
        let Some(response) = self.send(self.client.post(url).json(request))? else {
            return Ok(None);
        };
        let reservation = response
            .json()
            .context("failed to parse reservation response")?;
        Ok(Some(reservation))
    }

    fn commit(&self, reservation_id: &str, versions: &[AssetVersion]) -> Result<()> {
        let url = self.endpoint(&["publish"])?;
        let request = self
            .client
            .post(url)
            .header(reqwest::header::IF_MATCH, reservation_id)
            .json(versions);
        if self.send(request)?.is_none() {
            bail!("reservation {reservation_id} was not found by the registry; it may have expired");
        }
        Ok(())
    }

    fn abort(&self, reservation_id: &str) -> Result<()> {
        let url = self.endpoint(&["reservations", reservation_id])?;
        self.send(self.client.delete(url))?;
        Ok(())
    }

    fn get_version(&self, full_name: &str, version: &str) -> Result<Option<AssetVersion>> {
        self.get_json(self.asset_endpoint(full_name, version, None)?)
    }

    fn get_latest_version_before(&self, full_name: &str, version: &str) -> Result<Option<AssetVersion>> {
        self.get_json(self.asset_endpoint(full_name, version, Some("previous"))?)
    }
}
