//! Loading and validating definition files.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use blockship_types::AssetDefinition;
use serde::Deserialize;

use crate::error::PublishError;

/// Definition file names, in lookup order.
pub const DEFINITION_FILES: [&str; 2] = ["blockship.yml", "blockship.yaml"];

/// First definition file present in `dir`.
pub fn find_definition_file(dir: &Path) -> Option<PathBuf> {
    DEFINITION_FILES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
}

/// Parses every non-empty YAML document in `content`.
pub fn parse_definitions(content: &str) -> Result<Vec<AssetDefinition>> {
    let mut definitions = Vec::new();
    for (index, document) in serde_yaml::Deserializer::from_str(content).enumerate() {
        let value = serde_yaml::Value::deserialize(document)
            .with_context(|| format!("document {} is not valid YAML", index + 1))?;
        if value.is_null() {
            continue;
        }
        let definition: AssetDefinition = serde_yaml::from_value(value)
            .with_context(|| format!("document {} is not an asset definition", index + 1))?;
        definitions.push(definition);
    }
    Ok(definitions)
}

/// Reads `path` and checks every document names its asset.
pub fn load_definitions(path: &Path) -> Result<Vec<AssetDefinition>> {
    if !path.exists() {
        return Err(PublishError::DefinitionNotFound(path.to_path_buf()).into());
    }
    if !path.is_file() {
        return Err(PublishError::NotAFile(path.to_path_buf()).into());
    }

    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read definition file: {}", path.display()))?;
    let invalid = |reason: String| PublishError::InvalidDefinition {
        path: path.to_path_buf(),
        reason,
    };

    let definitions = parse_definitions(&content).map_err(|e| invalid(format!("{e:#}")))?;
    if definitions.is_empty() {
        return Err(invalid("no asset definitions found".to_string()).into());
    }
    for (index, definition) in definitions.iter().enumerate() {
        if definition.name().is_none() {
            return Err(invalid(format!("document {} is missing metadata.name", index + 1)).into());
        }
        definition
            .handle_and_name()
            .map_err(|e| invalid(e.to_string()))?;
    }

    Ok(definitions)
}

/// Serializes definitions back into a multi-document YAML file body.
pub fn render_definitions(definitions: &[AssetDefinition]) -> Result<String> {
    let mut out = String::new();
    for (index, definition) in definitions.iter().enumerate() {
        if index > 0 {
            out.push_str("---\n");
        }
        out.push_str(&serde_yaml::to_string(definition).context("failed to serialize definition")?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const TWO_BLOCKS: &str = r#"
kind: core/block-type-service:1.0.0
metadata:
  name: acme/users
  version: 1.0.0
---
kind: core/block-type-service:1.0.0
metadata:
  name: acme/orders
  version: local
spec:
  consumers:
    - kind: acme/users:local
      metadata:
        name: users
"#;

    #[test]
    fn parses_multi_document_files() {
        let definitions = parse_definitions(TWO_BLOCKS).expect("parse");
        assert_eq!(definitions.len(), 2);
        assert_eq!(definitions[0].name(), Some("acme/users"));
        assert_eq!(definitions[1].version(), Some("local"));
    }

    #[test]
    fn skips_empty_documents() {
        let definitions = parse_definitions("---\n---\nmetadata:\n  name: a/b\n").expect("parse");
        assert_eq!(definitions.len(), 1);
    }

    #[test]
    fn load_validates_files() {
        let td = tempdir().expect("tempdir");

        let missing = td.path().join("blockship.yml");
        let err = load_definitions(&missing).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PublishError>(),
            Some(PublishError::DefinitionNotFound(_))
        ));

        let err = load_definitions(td.path()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PublishError>(),
            Some(PublishError::NotAFile(_))
        ));

        fs::write(&missing, "kind: x\nmetadata:\n  version: 1.0.0\n").expect("write");
        let err = load_definitions(&missing).unwrap_err().to_string();
        assert!(err.ends_with("is invalid: document 1 is missing metadata.name"), "{err}");

        fs::write(&missing, "metadata:\n  name: no-handle\n").expect("write");
        let err = load_definitions(&missing).unwrap_err().to_string();
        assert!(err.contains("expected <handle>/<name>"), "{err}");

        fs::write(&missing, "").expect("write");
        let err = load_definitions(&missing).unwrap_err().to_string();
        assert!(err.ends_with("no asset definitions found"), "{err}");

        fs::write(&missing, TWO_BLOCKS).expect("write");
        assert_eq!(load_definitions(&missing).expect("load").len(), 2);
    }

    #[test]
    fn finds_either_file_name() {
        let td = tempdir().expect("tempdir");
        assert_eq!(find_definition_file(td.path()), None);
        fs::write(td.path().join("blockship.yaml"), "").expect("write");
        assert_eq!(
            find_definition_file(td.path()),
            Some(td.path().join("blockship.yaml"))
        );
        fs::write(td.path().join("blockship.yml"), "").expect("write");
        assert_eq!(
            find_definition_file(td.path()),
            Some(td.path().join("blockship.yml"))
        );
    }

    #[test]
    fn renders_documents_in_order() {
        let definitions = parse_definitions(TWO_BLOCKS).expect("parse");
        let single = render_definitions(&definitions[..1]).expect("render");
        assert!(!single.contains("---"));
        let both = render_definitions(&definitions).expect("render");
        assert_eq!(both.matches("---\n").count(), 1);
        assert!(both.find("acme/users") < both.find("acme/orders"));
        let again = parse_definitions(&render_definitions(&definitions).expect("render")).expect("parse");
        assert_eq!(again, definitions);
    }
}
