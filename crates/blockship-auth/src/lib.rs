//! Authentication and token resolution for blockship.
//!
//! Tokens are resolved from, in order:
//! - the `BLOCKSHIP_TOKEN` environment variable
//! - the JSON credentials file named by `BLOCKSHIP_CREDENTIALS` (`access_token` field)
//!
//! Nothing here fails eagerly: [`TokenProvider::has_credentials`] only
//! reports availability, and [`TokenProvider::token`] errors when a token is
//! actually needed and cannot be found.
//!
//! # Example
//!
//! ```
//! use blockship_auth::{EnvTokenProvider, TokenProvider};
//!
//! let provider = EnvTokenProvider;
//! if provider.has_credentials() {
//!     let _token = provider.token();
//! }
//! ```

use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Deserialize;

/// Environment variable holding a token directly
pub const TOKEN_ENV: &str = "BLOCKSHIP_TOKEN";

/// Environment variable pointing at the credentials file
pub const CREDENTIALS_ENV: &str = "BLOCKSHIP_CREDENTIALS";

/// Source of the authentication token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    None,
    Env,
    CredentialsFile,
}

impl std::fmt::Display for TokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenSource::None => write!(f, "none"),
            TokenSource::Env => write!(f, "{TOKEN_ENV}"),
            TokenSource::CredentialsFile => write!(f, "{CREDENTIALS_ENV}"),
        }
    }
}

/// Authentication information
#[derive(Debug, Clone)]
pub struct AuthInfo {
    pub token: Option<String>,
    pub source: TokenSource,
}

impl AuthInfo {
    pub fn detected(&self) -> bool {
        self.token.is_some()
    }
}

/// Contents of the credentials file.
#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub access_token: Option<String>,
}

/// Supplies bearer tokens to the registry client.
pub trait TokenProvider {
    fn has_credentials(&self) -> bool;
    fn token(&self) -> Result<String>;
}

/// Reads the process environment on every call.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvTokenProvider;

impl TokenProvider for EnvTokenProvider {
    fn has_credentials(&self) -> bool {
        resolve_token().detected()
    }

    fn token(&self) -> Result<String> {
        require_token()
    }
}

/// Fixed token, or none for anonymous access.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenProvider(pub Option<String>);

impl TokenProvider for StaticTokenProvider {
    fn has_credentials(&self) -> bool {
        self.0.is_some()
    }

    fn token(&self) -> Result<String> {
        match &self.0 {
            Some(token) => Ok(token.clone()),
            None => bail!("no registry token configured"),
        }
    }
}

/// Resolve the token without failing.
pub fn resolve_token() -> AuthInfo {
    if let Ok(token) = env::var(TOKEN_ENV)
        && !token.trim().is_empty()
    {
        return AuthInfo {
            token: Some(token.trim().to_string()),
            source: TokenSource::Env,
        };
    }

    if let Some(path) = credentials_path()
        && let Ok(token) = token_from_credentials_file(&path)
    {
        return AuthInfo {
            token: Some(token),
            source: TokenSource::CredentialsFile,
        };
    }

    AuthInfo {
        token: None,
        source: TokenSource::None,
    }
}

pub fn has_credentials() -> bool {
    resolve_token().detected()
}

/// Resolve the token, explaining what is missing when there is none.
pub fn require_token() -> Result<String> {
    if let Some(token) = resolve_token().token {
        return Ok(token);
    }
    let Some(path) = credentials_path() else {
        bail!("no registry credentials: set {TOKEN_ENV} or point {CREDENTIALS_ENV} at a credentials file");
    };
    // Surfaces the precise reason (missing file, bad JSON, empty token).
    token_from_credentials_file(&path)
}

fn credentials_path() -> Option<PathBuf> {
    env::var_os(CREDENTIALS_ENV)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

/// Read `access_token` from a JSON credentials file.
pub fn token_from_credentials_file(path: &Path) -> Result<String> {
    if !path.exists() {
        bail!("Credentials file not found: {}", path.display());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read credentials file: {}", path.display()))?;
    let credentials: Credentials = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse credentials file: {}", path.display()))?;

    match credentials.access_token {
        Some(token) if !token.trim().is_empty() => Ok(token.trim().to_string()),
        _ => bail!("credentials file {} has no access_token", path.display()),
    }
}

/// Mask a token for safe display (show first 4 and last 4 chars).
pub fn mask_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}****{tail}")
}
