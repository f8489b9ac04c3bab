//! Bare definitions: the registered definition is the whole artifact.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use blockship_registry::RegistryApi;
use blockship_types::{Artifact, YamlDetails};

use super::{ArtifactHandler, ArtifactKind};
use crate::checksum::hash_file;
use crate::definition::{DEFINITION_FILES, find_definition_file, render_definitions};
use crate::files::copy_named;
use crate::reporter::{Reporter, progress};

pub struct YamlHandler {
    directory: PathBuf,
}

impl YamlHandler {
    pub fn new(directory: &Path) -> Self {
        Self {
            directory: directory.to_path_buf(),
        }
    }

    fn definition_file(&self) -> Result<PathBuf> {
        find_definition_file(&self.directory).ok_or_else(|| {
            anyhow!(
                "Failed to find blockship YML file in folder: {}",
                self.directory.display()
            )
        })
    }
}

impl ArtifactHandler for YamlHandler {
    fn kind(&self) -> ArtifactKind {
        ArtifactKind::Yaml
    }

    fn verify(&self) -> Result<()> {
        Ok(())
    }

    fn calculate_checksum(&self, reporter: &mut dyn Reporter) -> Result<String> {
        let checksum = hash_file(&self.definition_file()?)?;
        reporter.info(&format!("Checksum: {checksum}"));
        Ok(checksum)
    }

    fn build(&self, _reporter: &mut dyn Reporter) -> Result<()> {
        Ok(())
    }

    fn test(&self, _reporter: &mut dyn Reporter) -> Result<()> {
        Ok(())
    }

    fn push(
        &self,
        name: &str,
        version: &str,
        _commit: Option<&str>,
        _reporter: &mut dyn Reporter,
    ) -> Result<Artifact> {
        Artifact::new(
            ArtifactKind::Yaml.type_name(),
            &YamlDetails {
                name: name.to_string(),
                version: version.to_string(),
            },
        )
    }

    fn pull(
        &self,
        artifact: &Artifact,
        target: &Path,
        registry: &dyn RegistryApi,
        reporter: &mut dyn Reporter,
    ) -> Result<()> {
        let details: YamlDetails = artifact.details_as()?;
        progress(
            reporter,
            &format!("Pulling definition: {}:{}", details.name, details.version),
            |_| {
                let registered = registry
                    .get_version(&details.name, &details.version)?
                    .ok_or_else(|| {
                        anyhow!("Registration not found: {}:{}", details.name, details.version)
                    })?;
                fs::create_dir_all(target)
                    .with_context(|| format!("failed to create {}", target.display()))?;
                let path = target.join(DEFINITION_FILES[0]);
                fs::write(&path, render_definitions(&[registered.content])?)
                    .with_context(|| format!("failed to write {}", path.display()))
            },
        )
    }

    fn install(&self, source: &Path, target: &Path) -> Result<()> {
        let mut names: Vec<&str> = DEFINITION_FILES.to_vec();
        names.push("README.md");
        copy_named(source, target, &names)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::load_definitions;
    use crate::test_support::{CollectingReporter, FakeRegistry, definition, write_file};
    use tempfile::tempdir;

    #[test]
    fn checksum_is_file_hash() {
        let td = tempdir().expect("tempdir");
        let handler = YamlHandler::new(td.path());
        let mut reporter = CollectingReporter::default();
        let err = handler.calculate_checksum(&mut reporter).unwrap_err();
        assert!(err.to_string().starts_with("Failed to find blockship YML file in folder"));

        write_file(&td.path().join("blockship.yaml"), "abc");
        assert_eq!(
            handler.calculate_checksum(&mut reporter).expect("checksum"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn push_describes_the_definition() {
        let td = tempdir().expect("tempdir");
        let artifact = YamlHandler::new(td.path())
            .push("acme/users", "1.0.0", Some("abc"), &mut CollectingReporter::default())
            .expect("push");
        assert_eq!(artifact.kind, "yaml");
        assert_eq!(
            artifact.details,
            serde_json::json!({"name": "acme/users", "version": "1.0.0"})
        );
    }

    #[test]
    fn pull_writes_the_registered_definition() {
        let td = tempdir().expect("tempdir");
        let registry = FakeRegistry::default();
        registry.register(definition("acme/users", "1.0.0"), "sum");
        let handler = YamlHandler::new(td.path());
        let artifact = handler
            .push("acme/users", "1.0.0", None, &mut CollectingReporter::default())
            .expect("artifact");

        let target = td.path().join("out");
        handler
            .pull(&artifact, &target, &registry, &mut CollectingReporter::default())
            .expect("pull");
        let pulled = load_definitions(&target.join("blockship.yml")).expect("load");
        assert_eq!(pulled, vec![definition("acme/users", "1.0.0")]);

        let missing = handler
            .push("acme/users", "9.9.9", None, &mut CollectingReporter::default())
            .expect("artifact");
        let err = handler
            .pull(&missing, &target, &registry, &mut CollectingReporter::default())
            .unwrap_err();
        assert_eq!(err.to_string(), "Registration not found: acme/users:9.9.9");
    }
}
