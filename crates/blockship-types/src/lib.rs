//! Core domain types for blockship.
//!
//! This crate holds the data model shared by the version engine, the
//! registry client and the publish pipeline: asset definitions as authored on
//! disk, the reservation handshake with the registry, and the version
//! registrations that get committed.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use anyhow::{Result, anyhow, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Version sentinel meaning "whatever gets published from local source in this run".
pub const LOCAL_VERSION: &str = "local";

/// Version used when a reference omits one.
pub const CURRENT_VERSION: &str = "current";

/// `metadata` block of an asset definition.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AssetMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Any other metadata (title, description, visibility, ...).
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// One publishable unit as authored in a definition file.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AssetDefinition {
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub metadata: AssetMetadata,
    /// Type-specific tree; opaque to the pipeline except for dependency references.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub spec: Value,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl AssetDefinition {
    pub fn name(&self) -> Option<&str> {
        self.metadata.name.as_deref().filter(|n| !n.is_empty())
    }

    pub fn version(&self) -> Option<&str> {
        self.metadata.version.as_deref().filter(|v| !v.is_empty())
    }

    pub fn set_version(&mut self, version: impl Into<String>) {
        self.metadata.version = Some(version.into());
    }

    /// Splits `metadata.name` into `(handle, name)`.
    pub fn handle_and_name(&self) -> Result<(&str, &str)> {
        let full = self
            .name()
            .ok_or_else(|| anyhow!("asset definition is missing metadata.name"))?;
        split_full_name(full)
    }

    /// `handle/name:version` for this definition.
    pub fn reference(&self) -> Result<AssetReference> {
        let (handle, name) = self.handle_and_name()?;
        let version = self
            .version()
            .ok_or_else(|| anyhow!("asset definition {handle}/{name} is missing metadata.version"))?;
        Ok(AssetReference::new(handle, name, version))
    }

    /// Resource list stored under `spec.<key>` (`consumers` or `providers`).
    pub fn resources(&self, key: &str) -> Result<Vec<ResourceDefinition>> {
        match self.spec.get(key) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|e| anyhow!("invalid spec.{key} in {}: {e}", self.display_name())),
        }
    }

    /// Entity list stored under `spec.entities`.
    pub fn entities(&self) -> Result<Vec<EntityDefinition>> {
        match self.spec.get("entities") {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|e| anyhow!("invalid spec.entities in {}: {e}", self.display_name())),
        }
    }

    fn display_name(&self) -> &str {
        self.name().unwrap_or("<unnamed>")
    }
}

/// Splits `handle/name` into its two segments.
pub fn split_full_name(full: &str) -> Result<(&str, &str)> {
    match full.split_once('/') {
        Some((handle, name)) if !handle.is_empty() && !name.is_empty() && !name.contains('/') => {
            Ok((handle, name))
        }
        _ => bail!("invalid asset name '{full}': expected <handle>/<name>"),
    }
}

/// `metadata` of a consumer/provider resource.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResourceMetadata {
    #[serde(default)]
    pub name: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Entry of `spec.consumers` / `spec.providers`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResourceDefinition {
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub metadata: ResourceMetadata,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub spec: Value,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ResourceDefinition {
    /// Comparison identity: `kind:metadata.name`.
    pub fn identity(&self) -> String {
        format!("{}:{}", self.kind, self.metadata.name)
    }
}

/// Entry of `spec.entities`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EntityDefinition {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, Value>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Server-issued claim on one or more versions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    pub id: String,
    /// Expiry as epoch milliseconds, when the registry reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<i64>,
    #[serde(default)]
    pub versions: Vec<ReservedVersion>,
}

impl Reservation {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires.and_then(DateTime::<Utc>::from_timestamp_millis)
    }

    /// True when every reserved version already exists remotely.
    pub fn all_exist(&self) -> bool {
        self.versions.iter().all(|v| v.exists)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservedVersion {
    pub version: String,
    pub content: AssetDefinition,
    #[serde(default)]
    pub exists: bool,
}

/// Pushed build output: `{type, details}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    #[serde(rename = "type")]
    pub kind: String,
    pub details: Value,
}

impl Artifact {
    pub fn new<T: Serialize>(kind: impl Into<String>, details: &T) -> Result<Self> {
        Ok(Self {
            kind: kind.into(),
            details: serde_json::to_value(details)?,
        })
    }

    pub fn details_as<T: for<'de> Deserialize<'de>>(&self) -> Result<T> {
        serde_json::from_value(self.details.clone())
            .map_err(|e| anyhow!("invalid {} artifact details: {e}", self.kind))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DockerDetails {
    pub name: String,
    pub primary: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NpmDetails {
    pub name: String,
    pub version: String,
    pub registry: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MavenDetails {
    pub group_id: String,
    pub artifact_id: String,
    pub version: String,
    pub registry: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YamlDetails {
    pub name: String,
    pub version: String,
}

/// VCS snapshot captured once per push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Repository {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default)]
    pub main: bool,
    #[serde(default)]
    pub details: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Readme {
    #[serde(rename = "type")]
    pub kind: String,
    pub content: String,
}

impl Readme {
    pub fn markdown(content: impl Into<String>) -> Self {
        Self {
            kind: "markdown".to_string(),
            content: content.into(),
        }
    }
}

/// A registered (or to-be-committed) version of an asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetVersion {
    pub content: AssetDefinition,
    #[serde(default)]
    pub checksum: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readme: Option<Readme>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<Repository>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<Artifact>,
}

/// `handle/name:version` reference to an asset, optionally prefixed with a
/// `scheme://`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AssetReference {
    pub handle: String,
    pub name: String,
    pub version: String,
}

impl AssetReference {
    pub fn new(handle: impl Into<String>, name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            handle: handle.into(),
            name: name.into(),
            version: version.into(),
        }
    }

    /// `handle/name`
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.handle, self.name)
    }

    pub fn is_local(&self) -> bool {
        self.version.eq_ignore_ascii_case(LOCAL_VERSION)
    }

    /// Parses only references that carry an explicit version segment.
    pub fn parse_versioned(input: &str) -> Option<Self> {
        let (_, rest) = strip_scheme(input.trim());
        if !rest.contains(':') {
            return None;
        }
        input.parse().ok()
    }

    pub fn with_version(&self, version: impl Into<String>) -> Self {
        Self::new(self.handle.clone(), self.name.clone(), version)
    }
}

fn strip_scheme(input: &str) -> (Option<&str>, &str) {
    match input.split_once("://") {
        Some((scheme, rest)) => (Some(scheme), rest),
        None => (None, input),
    }
}

fn valid_segment(segment: &str) -> bool {
    !segment.is_empty() && !segment.chars().any(|c| c.is_whitespace() || c == '/' || c == ':')
}

impl FromStr for AssetReference {
    type Err = anyhow::Error;

    fn from_str(input: &str) -> Result<Self> {
        let (_, rest) = strip_scheme(input.trim());
        let Some((handle, name_and_version)) = rest.split_once('/') else {
            bail!("invalid asset reference '{input}': expected <handle>/<name>[:<version>]");
        };
        let (name, version) = match name_and_version.split_once(':') {
            Some((name, version)) => (name, version),
            None => (name_and_version, CURRENT_VERSION),
        };
        if !valid_segment(handle) || !valid_segment(name) || !valid_segment(version) {
            bail!("invalid asset reference '{input}': expected <handle>/<name>[:<version>]");
        }
        Ok(Self::new(handle, name, version))
    }
}

impl fmt::Display for AssetReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.handle, self.name, self.version)
    }
}

/// A single entry of the publish event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishEvent {
    /// When the event occurred
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event_type: EventType,
    /// Asset this event relates to (or "all" for push-level events)
    pub asset: String,
}

impl PublishEvent {
    pub fn now(event_type: EventType, asset: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type,
            asset: asset.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventType {
    RunStarted { file: String, dry_run: bool },
    StepStarted { step: String },
    StepFinished { step: String, success: bool },
    VersionCalculated { from: String, to: String },
    DependencyResolved { reference: String, resolved: String },
    ReservationCreated { id: String, versions: Vec<String> },
    VersionExists { version: String },
    ArtifactPushed { version: String, artifact_type: String },
    ReservationCommitted { id: String },
    ReservationAborted { id: String, reason: String },
    VcsTagged { tag: String },
    RunFinished { success: bool },
}
