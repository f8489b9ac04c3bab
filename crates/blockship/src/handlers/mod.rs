//! Artifact handlers: one per payload type a directory can publish.
//!
//! Selection goes through a fixed priority table. For a push the first kind
//! whose directory signature matches wins (`Dockerfile`, `package.json`,
//! `pom.xml`, and the bare definition as catch-all); for a pull the declared
//! artifact type picks the kind.

use std::fmt;
use std::path::Path;

use anyhow::{Result, bail};
use blockship_config::Config;
use blockship_process::{CommandResult, command_exists, run_command_streaming};
use blockship_registry::RegistryApi;
use blockship_types::Artifact;

use crate::error::PublishError;
use crate::reporter::Reporter;
use crate::vcs::{VcsHandler, VcsKind};

pub mod docker;
pub mod maven;
pub mod npm;
pub mod yaml;

pub use docker::DockerHandler;
pub use maven::MavenHandler;
pub use npm::NpmHandler;
pub use yaml::YamlHandler;

/// Environment variable overriding the docker executable
pub const DOCKER_BIN_ENV: &str = "BLOCKSHIP_DOCKER_BIN";
/// Environment variable overriding the npm executable
pub const NPM_BIN_ENV: &str = "BLOCKSHIP_NPM_BIN";
/// Environment variable overriding the maven executable
pub const MVN_BIN_ENV: &str = "BLOCKSHIP_MVN_BIN";

/// Builds, checksums, pushes and fetches one kind of artifact.
pub trait ArtifactHandler {
    fn kind(&self) -> ArtifactKind;

    /// Human readable name, e.g. `Docker`.
    fn name(&self) -> &'static str {
        self.kind().display_name()
    }

    /// Checks the underlying tool is available. Advisory only.
    fn verify(&self) -> Result<()>;

    fn calculate_checksum(&self, reporter: &mut dyn Reporter) -> Result<String>;

    fn build(&self, reporter: &mut dyn Reporter) -> Result<()>;

    fn test(&self, reporter: &mut dyn Reporter) -> Result<()>;

    /// Publishes the artifact for `name` (`handle/name`) at `version`.
    fn push(
        &self,
        name: &str,
        version: &str,
        commit: Option<&str>,
        reporter: &mut dyn Reporter,
    ) -> Result<Artifact>;

    /// Fetches a previously pushed artifact into `target`.
    fn pull(
        &self,
        artifact: &Artifact,
        target: &Path,
        registry: &dyn RegistryApi,
        reporter: &mut dyn Reporter,
    ) -> Result<()>;

    /// Copies the asset from `source` into a local repository path.
    fn install(&self, source: &Path, target: &Path) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    Docker,
    Npm,
    Maven,
    Yaml,
}

impl ArtifactKind {
    /// Selection priority for directories.
    pub const ALL: [ArtifactKind; 4] = [
        ArtifactKind::Docker,
        ArtifactKind::Npm,
        ArtifactKind::Maven,
        ArtifactKind::Yaml,
    ];

    /// Declared type string stored on artifacts.
    pub fn type_name(self) -> &'static str {
        match self {
            ArtifactKind::Docker => "docker",
            ArtifactKind::Npm => "npm",
            ArtifactKind::Maven => "maven",
            ArtifactKind::Yaml => "yaml",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            ArtifactKind::Docker => "Docker",
            ArtifactKind::Npm => "NPM",
            ArtifactKind::Maven => "Maven",
            ArtifactKind::Yaml => "YAML File",
        }
    }

    pub fn from_type_name(type_name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.type_name().eq_ignore_ascii_case(type_name.trim()))
    }

    /// Directory signature check.
    pub fn is_supported(self, directory: &Path) -> bool {
        match self {
            ArtifactKind::Docker => directory.join(docker::DOCKERFILE).is_file(),
            ArtifactKind::Npm => directory.join("package.json").is_file(),
            ArtifactKind::Maven => directory.join("pom.xml").is_file(),
            ArtifactKind::Yaml => true,
        }
    }

    pub fn create(self, directory: &Path, config: &Config) -> Box<dyn ArtifactHandler> {
        match self {
            ArtifactKind::Docker => Box::new(DockerHandler::new(directory, config)),
            ArtifactKind::Npm => Box::new(NpmHandler::new(directory, config)),
            ArtifactKind::Maven => Box::new(MavenHandler::new(directory, config)),
            ArtifactKind::Yaml => Box::new(YamlHandler::new(directory)),
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// Picks artifact and VCS handlers from their registration tables.
#[derive(Debug, Clone)]
pub struct HandlerRegistry {
    config: Config,
    artifact_kinds: Vec<ArtifactKind>,
    vcs_kinds: Vec<VcsKind>,
}

impl HandlerRegistry {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            artifact_kinds: ArtifactKind::ALL.to_vec(),
            vcs_kinds: VcsKind::ALL.to_vec(),
        }
    }

    /// Restricts (and orders) the artifact kinds considered.
    pub fn with_artifact_kinds(mut self, kinds: &[ArtifactKind]) -> Self {
        self.artifact_kinds = kinds.to_vec();
        self
    }

    pub fn with_vcs_kinds(mut self, kinds: &[VcsKind]) -> Self {
        self.vcs_kinds = kinds.to_vec();
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn artifact_handler_for_directory(&self, directory: &Path) -> Result<Box<dyn ArtifactHandler>> {
        match self
            .artifact_kinds
            .iter()
            .find(|kind| kind.is_supported(directory))
        {
            Some(kind) => Ok(kind.create(directory, &self.config)),
            None => Err(PublishError::ArtifactTypeNotFound(directory.display().to_string()).into()),
        }
    }

    pub fn artifact_handler_for_type(
        &self,
        type_name: &str,
        directory: &Path,
    ) -> Result<Box<dyn ArtifactHandler>> {
        match ArtifactKind::from_type_name(type_name)
            .filter(|kind| self.artifact_kinds.contains(kind))
        {
            Some(kind) => Ok(kind.create(directory, &self.config)),
            None => Err(PublishError::ArtifactTypeNotFound(type_name.to_string()).into()),
        }
    }

    /// `None` when the directory is not under version control.
    pub fn vcs_handler_for_directory(&self, directory: &Path) -> Option<Box<dyn VcsHandler>> {
        self.vcs_kinds
            .iter()
            .find(|kind| kind.is_supported(directory))
            .map(|kind| kind.create(directory))
    }
}

/// Runs an external tool, streaming its output to `reporter.debug`.
pub(crate) fn run_tool(
    program: &str,
    args: &[&str],
    dir: &Path,
    reporter: &mut dyn Reporter,
) -> Result<CommandResult> {
    reporter.debug(&format!("$ {program} {}", args.join(" ")));
    run_command_streaming(program, args, dir, &mut |line| reporter.debug(line))
}

pub(crate) fn ensure_tool(program: &str) -> Result<()> {
    if !command_exists(program) {
        bail!("{program} was not found on PATH");
    }
    Ok(())
}

pub(crate) fn build_step(result: &CommandResult, what: &str) -> Result<()> {
    result
        .ok(what)
        .map(|_| ())
        .map_err(|e| PublishError::BuildFailed(e.to_string()).into())
}

pub(crate) fn test_step(result: &CommandResult, what: &str) -> Result<()> {
    result
        .ok(what)
        .map(|_| ())
        .map_err(|e| PublishError::TestsFailed(e.to_string()).into())
}
