//! Maven projects, built and deployed with `mvn`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use blockship_config::Config;
use blockship_process::program_from_env;
use blockship_registry::RegistryApi;
use blockship_types::{Artifact, MavenDetails};
use regex::Regex;

use super::{
    ArtifactHandler, ArtifactKind, MVN_BIN_ENV, build_step, ensure_tool, run_tool, test_step,
};
use crate::checksum::{IgnoreRules, hash_directory};
use crate::files::{FileBackup, copy_tree};
use crate::reporter::{Reporter, progress};

const POM: &str = "pom.xml";

/// Repository id passed to maven for deploys and lookups.
const REPOSITORY_ID: &str = "blockship";

pub struct MavenHandler {
    directory: PathBuf,
    registry: String,
    program: String,
}

/// `(groupId, artifactId)` of the project in a pom. The group falls back to
/// the parent's when the project inherits it.
pub fn read_coordinates(pom: &str) -> Result<(String, String)> {
    let parent_block = Regex::new(r"(?s)<parent>.*?</parent>")?;
    let nested_blocks =
        Regex::new(r"(?s)<(dependencies|dependencyManagement|build|plugins|profiles|reporting)>.*?</(dependencies|dependencyManagement|build|plugins|profiles|reporting)>")?;
    let group = Regex::new(r"<groupId>\s*([^<\s]+)\s*</groupId>")?;
    let artifact = Regex::new(r"<artifactId>\s*([^<\s]+)\s*</artifactId>")?;

    let parent = parent_block.find(pom).map(|m| m.as_str());
    let project = nested_blocks.replace_all(&parent_block.replace(pom, ""), "").into_owned();

    let first = |re: &Regex, text: &str| re.captures(text).map(|c| c[1].to_string());
    let artifact_id = first(&artifact, &project)
        .ok_or_else(|| anyhow!("{POM} does not declare an artifactId"))?;
    let group_id = first(&group, &project)
        .or_else(|| parent.and_then(|p| first(&group, p)))
        .ok_or_else(|| anyhow!("{POM} does not declare a groupId"))?;
    Ok((group_id, artifact_id))
}

impl MavenHandler {
    pub fn new(directory: &Path, config: &Config) -> Self {
        Self {
            directory: directory.to_path_buf(),
            registry: config.maven_registry(),
            program: program_from_env(MVN_BIN_ENV, "mvn"),
        }
    }

    fn mvn(&self, args: &[&str], dir: &Path, reporter: &mut dyn Reporter) -> Result<()> {
        let result = run_tool(&self.program, args, dir, reporter)?;
        let goal = args.iter().find(|a| !a.starts_with('-')).copied().unwrap_or_default();
        result.ok(&format!("mvn {goal}"))?;
        Ok(())
    }

    fn coordinates(&self) -> Result<(String, String)> {
        let path = self.directory.join(POM);
        let pom =
            fs::read_to_string(&path).with_context(|| format!("failed to read {}", path.display()))?;
        read_coordinates(&pom)
    }
}

impl ArtifactHandler for MavenHandler {
    fn kind(&self) -> ArtifactKind {
        ArtifactKind::Maven
    }

    fn verify(&self) -> Result<()> {
        ensure_tool(&self.program)
    }

    fn calculate_checksum(&self, reporter: &mut dyn Reporter) -> Result<String> {
        let checksum = hash_directory(&self.directory, &IgnoreRules::new(&[".git", "target"]))?;
        reporter.info(&format!("Checksum: {checksum}"));
        Ok(checksum)
    }

    fn build(&self, reporter: &mut dyn Reporter) -> Result<()> {
        let result = run_tool(
            &self.program,
            &["-B", "package", "-DskipTests"],
            &self.directory,
            reporter,
        )?;
        build_step(&result, "mvn package")
    }

    fn test(&self, reporter: &mut dyn Reporter) -> Result<()> {
        let result = run_tool(&self.program, &["-B", "test"], &self.directory, reporter)?;
        test_step(&result, "mvn test")
    }

    fn push(
        &self,
        _name: &str,
        version: &str,
        _commit: Option<&str>,
        reporter: &mut dyn Reporter,
    ) -> Result<Artifact> {
        let (group_id, artifact_id) = self.coordinates()?;
        let backup = FileBackup::new(&self.directory.join(POM))?;

        let new_version = format!("-DnewVersion={version}");
        self.mvn(
            &["-B", "versions:set", &new_version, "-DgenerateBackupPoms=false"],
            &self.directory,
            reporter,
        )?;

        let repository = format!("-DaltDeploymentRepository={REPOSITORY_ID}::{}", self.registry);
        progress(
            reporter,
            &format!("Deploying {group_id}:{artifact_id}:{version} to {}", self.registry),
            |r| self.mvn(&["-B", "deploy", "-DskipTests", &repository], &self.directory, r),
        )?;
        backup.restore()?;

        Artifact::new(
            ArtifactKind::Maven.type_name(),
            &MavenDetails {
                group_id,
                artifact_id,
                version: version.to_string(),
                registry: self.registry.clone(),
            },
        )
    }

    fn pull(
        &self,
        artifact: &Artifact,
        target: &Path,
        _registry: &dyn RegistryApi,
        reporter: &mut dyn Reporter,
    ) -> Result<()> {
        let details: MavenDetails = artifact.details_as()?;
        fs::create_dir_all(target)
            .with_context(|| format!("failed to create {}", target.display()))?;

        let coordinates = format!(
            "{}:{}:{}",
            details.group_id, details.artifact_id, details.version
        );
        let artifact_arg = format!("-Dartifact={coordinates}");
        let output = format!("-DoutputDirectory={}", target.display());
        let remote = format!("-DremoteRepositories={REPOSITORY_ID}::::{}", details.registry);
        progress(reporter, &format!("Pulling maven artifact: {coordinates}"), |r| {
            self.mvn(
                &["-B", "dependency:copy", &artifact_arg, &output, &remote],
                target,
                r,
            )
        })
    }

    fn install(&self, source: &Path, target: &Path) -> Result<()> {
        copy_tree(source, target, &IgnoreRules::new(&[".git", "target"]))?;
        Ok(())
    }
}
