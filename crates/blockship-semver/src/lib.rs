//! Structural version diffing for blockship asset definitions.
//!
//! Given the definition being published and the one already registered, the
//! engine decides the smallest semantic-version increment the change
//! requires. Removing or altering anything a consumer may depend on is
//! [`IncrementType::Major`], pure additions are [`IncrementType::Minor`], and
//! everything else needs no bump at all.
//!
//! # Example
//!
//! ```
//! use blockship_semver::{IncrementType, increment_version_by};
//!
//! assert_eq!(increment_version_by("1.4.2", IncrementType::Minor).unwrap(), "1.5.0");
//! assert_eq!(increment_version_by("1.4.2", IncrementType::None).unwrap(), "1.4.2");
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use anyhow::{Context, Result, anyhow, bail};
use blockship_types::{AssetDefinition, EntityDefinition, ResourceDefinition};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Required version bump, totally ordered `None < Patch < Minor < Major`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IncrementType {
    #[default]
    None,
    Patch,
    Minor,
    Major,
}

impl fmt::Display for IncrementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IncrementType::None => write!(f, "NONE"),
            IncrementType::Patch => write!(f, "PATCH"),
            IncrementType::Minor => write!(f, "MINOR"),
            IncrementType::Major => write!(f, "MAJOR"),
        }
    }
}

/// `major.minor.patch`; a `-prerelease` or `+build` suffix is accepted and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VersionInfo {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl VersionInfo {
    /// Fails when the bumped component would overflow.
    pub fn bump(self, increment: IncrementType) -> Result<Self> {
        let next = |component: u64| {
            component
                .checked_add(1)
                .ok_or_else(|| anyhow!("version component overflow in {self}"))
        };
        Ok(match increment {
            IncrementType::None => self,
            IncrementType::Patch => Self {
                patch: next(self.patch)?,
                ..self
            },
            IncrementType::Minor => Self {
                minor: next(self.minor)?,
                patch: 0,
                ..self
            },
            IncrementType::Major => Self {
                major: next(self.major)?,
                minor: 0,
                patch: 0,
            },
        })
    }
}

impl FromStr for VersionInfo {
    type Err = anyhow::Error;

    fn from_str(version: &str) -> Result<Self> {
        let core = version
            .split(['-', '+'])
            .next()
            .unwrap_or_default()
            .trim();
        let parts: Vec<&str> = core.split('.').collect();
        if parts.len() != 3 {
            bail!("invalid version '{version}': expected <major>.<minor>.<patch>");
        }
        let number = |part: &str| -> Result<u64> {
            part.parse::<u64>()
                .with_context(|| format!("invalid version '{version}': '{part}' is not a number"))
        };
        Ok(Self {
            major: number(parts[0])?,
            minor: number(parts[1])?,
            patch: number(parts[2])?,
        })
    }
}

impl fmt::Display for VersionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

pub fn parse_version(version: &str) -> Result<VersionInfo> {
    version.parse()
}

/// Bumps `version` by `increment`. `None` returns the input unchanged.
pub fn increment_version_by(version: &str, increment: IncrementType) -> Result<String> {
    let info = parse_version(version)?;
    if increment == IncrementType::None {
        return Ok(version.to_string());
    }
    Ok(info.bump(increment)?.to_string())
}

/// Positional comparison of two concrete versions.
pub fn calculate_increment_type(from: &str, to: &str) -> Result<IncrementType> {
    let from = parse_version(from)?;
    let to = parse_version(to)?;
    Ok(if from.major != to.major {
        IncrementType::Major
    } else if from.minor != to.minor {
        IncrementType::Minor
    } else if from.patch != to.patch {
        IncrementType::Patch
    } else {
        IncrementType::None
    })
}

pub fn is_increment_greater_than(a: IncrementType, b: IncrementType) -> bool {
    a > b
}

/// Version `new` must carry given what is already registered as `existing`.
pub fn calculate_next_version(new: &AssetDefinition, existing: &AssetDefinition) -> Result<String> {
    let version = new
        .version()
        .ok_or_else(|| anyhow!("cannot calculate next version: metadata.version is missing"))?;
    let increment = compare_definitions(new, existing)?;
    increment_version_by(version, increment)
}

/// Smallest increment that publishing `new` over `old` requires.
pub fn compare_definitions(new: &AssetDefinition, old: &AssetDefinition) -> Result<IncrementType> {
    if !new.kind.eq_ignore_ascii_case(&old.kind) {
        return Ok(IncrementType::Major);
    }

    let new_empty = is_empty(&new.spec);
    let old_empty = is_empty(&old.spec);
    if new_empty && old_empty {
        return Ok(IncrementType::None);
    }
    if new_empty {
        return Ok(IncrementType::Major);
    }

    let entities = compare_entities(&new.entities()?, &old.entities()?);
    if entities == IncrementType::Major {
        return Ok(IncrementType::Major);
    }

    let consumers = compare_resource_maps(
        &as_resource_map(new.resources("consumers")?)?,
        &as_resource_map(old.resources("consumers")?)?,
    );
    if consumers == IncrementType::Major {
        return Ok(IncrementType::Major);
    }

    let providers = compare_resource_maps(
        &as_resource_map(new.resources("providers")?)?,
        &as_resource_map(old.resources("providers")?)?,
    );

    Ok(entities.max(consumers).max(providers))
}

/// Entities by name: removed or changed is major, added is minor.
pub fn compare_entities(new: &[EntityDefinition], old: &[EntityDefinition]) -> IncrementType {
    let new_by_name: BTreeMap<&str, &EntityDefinition> =
        new.iter().map(|e| (e.name.as_str(), e)).collect();
    let old_by_name: BTreeMap<&str, &EntityDefinition> =
        old.iter().map(|e| (e.name.as_str(), e)).collect();

    for (name, old_entity) in &old_by_name {
        match new_by_name.get(name) {
            None => return IncrementType::Major,
            Some(new_entity) if new_entity != old_entity => return IncrementType::Major,
            Some(_) => {}
        }
    }

    if new_by_name.keys().any(|name| !old_by_name.contains_key(name)) {
        return IncrementType::Minor;
    }
    IncrementType::None
}

/// Keys resources by `kind:name`, rejecting duplicates.
pub fn as_resource_map(resources: Vec<ResourceDefinition>) -> Result<BTreeMap<String, ResourceDefinition>> {
    let mut out = BTreeMap::new();
    for resource in resources {
        let id = resource.identity();
        if out.contains_key(&id) {
            bail!(
                "Found 2 identical resources: {id}. Make sure your resources are uniquely named per kind."
            );
        }
        out.insert(id, resource);
    }
    Ok(out)
}

pub fn compare_resource_maps(
    new: &BTreeMap<String, ResourceDefinition>,
    old: &BTreeMap<String, ResourceDefinition>,
) -> IncrementType {
    if new == old {
        return IncrementType::None;
    }

    let mut out = IncrementType::None;
    for (key, old_resource) in old {
        let Some(new_resource) = new.get(key) else {
            return IncrementType::Major;
        };
        match compare_resources(new_resource, old_resource) {
            IncrementType::Major => return IncrementType::Major,
            IncrementType::Minor => out = IncrementType::Minor,
            _ => {}
        }
    }

    if new.keys().any(|key| !old.contains_key(key)) {
        out = IncrementType::Minor;
    }
    out
}

pub fn compare_resources(new: &ResourceDefinition, old: &ResourceDefinition) -> IncrementType {
    if new == old {
        return IncrementType::None;
    }
    if new.metadata.name != old.metadata.name {
        return IncrementType::Major;
    }

    let new_empty = is_empty(&new.spec);
    let old_empty = is_empty(&old.spec);
    if new_empty && old_empty {
        return IncrementType::None;
    }
    if new_empty != old_empty {
        return IncrementType::Major;
    }

    if is_api_kind(&new.kind) {
        return compare_methods(methods(&new.spec), methods(&old.spec));
    }

    if new.spec != old.spec {
        return IncrementType::Major;
    }
    IncrementType::None
}

/// Methods keyed by id. Description changes are ignored.
pub fn compare_methods(new: &Map<String, Value>, old: &Map<String, Value>) -> IncrementType {
    for (id, old_method) in old {
        let Some(new_method) = new.get(id) else {
            return IncrementType::Major;
        };

        let old_method = without_description(old_method);
        let new_method = without_description(new_method);
        if old_method == new_method {
            continue;
        }

        let breaking = ["arguments", "responseType", "method", "path"]
            .iter()
            .any(|field| old_method.get(field) != new_method.get(field));
        if breaking {
            return IncrementType::Major;
        }
    }

    if new.keys().any(|id| !old.contains_key(id)) {
        return IncrementType::Minor;
    }
    IncrementType::None
}

/// REST and gRPC api/client resource kinds, in both the dotted
/// (`rest.example.com/v1/api`) and the handle (`core/resource-type-rest-api:1.0.0`) form.
pub fn is_api_kind(kind: &str) -> bool {
    let lower = kind.to_ascii_lowercase();
    let base = lower.split(':').next().unwrap_or_default();

    if (base.starts_with("rest.") || base.starts_with("grpc."))
        && (base.ends_with("/api") || base.ends_with("/client"))
    {
        return true;
    }

    let last = base.rsplit('/').next().unwrap_or_default();
    matches!(
        last,
        "resource-type-rest-api"
            | "resource-type-rest-client"
            | "resource-type-grpc-api"
            | "resource-type-grpc-client"
    )
}

fn methods(spec: &Value) -> &Map<String, Value> {
    static EMPTY: std::sync::OnceLock<Map<String, Value>> = std::sync::OnceLock::new();
    spec.get("methods")
        .and_then(Value::as_object)
        .unwrap_or_else(|| EMPTY.get_or_init(Map::new))
}

fn without_description(method: &Value) -> Value {
    let mut method = method.clone();
    if let Value::Object(map) = &mut method {
        map.remove("description");
    }
    method
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}
