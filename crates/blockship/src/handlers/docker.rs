//! Docker images, built and pushed with the `docker` CLI.

use std::path::{Path, PathBuf};

use anyhow::Result;
use blockship_config::Config;
use blockship_process::program_from_env;
use blockship_registry::RegistryApi;
use blockship_semver::parse_version;
use blockship_types::{Artifact, DockerDetails};

use super::{ArtifactHandler, ArtifactKind, DOCKER_BIN_ENV, build_step, ensure_tool, run_tool};
use crate::checksum::{IgnoreRules, hash_directory};
use crate::definition::DEFINITION_FILES;
use crate::files::{copy_named, copy_tree};
use crate::reporter::{Reporter, progress};

pub const DOCKERFILE: &str = "Dockerfile";

pub struct DockerHandler {
    directory: PathBuf,
    registry_host: Option<String>,
    program: String,
}

impl DockerHandler {
    pub fn new(directory: &Path, config: &Config) -> Self {
        Self {
            directory: directory.to_path_buf(),
            registry_host: config
                .docker_registry()
                .map(|host| host.trim_end_matches('/').to_string()),
            program: program_from_env(DOCKER_BIN_ENV, "docker"),
        }
    }

    /// `[host/]handle/name`, lower-cased.
    pub fn image_name(&self, name: &str) -> String {
        match &self.registry_host {
            Some(host) => format!("{host}/{name}").to_lowercase(),
            None => name.to_lowercase(),
        }
    }

    pub fn local_build_tag(name: &str) -> String {
        format!("{name}:local").to_lowercase()
    }

    /// `x.y.z`, `x.y` and `x` tags, plus the commit when known.
    pub fn tags(&self, name: &str, version: &str, commit: Option<&str>) -> Result<Vec<String>> {
        let image = self.image_name(name);
        let info = parse_version(version)?;
        let mut tags = vec![
            format!("{image}:{}.{}.{}", info.major, info.minor, info.patch),
            format!("{image}:{}.{}", info.major, info.minor),
            format!("{image}:{}", info.major),
        ];
        if let Some(commit) = commit.filter(|c| !c.is_empty()) {
            tags.push(format!("{image}:{commit}"));
        }
        Ok(tags)
    }

    fn docker(&self, args: &[&str], reporter: &mut dyn Reporter) -> Result<()> {
        let result = run_tool(&self.program, args, &self.directory, reporter)?;
        result.ok(&format!("docker {}", args.first().copied().unwrap_or_default()))?;
        Ok(())
    }
}

impl ArtifactHandler for DockerHandler {
    fn kind(&self) -> ArtifactKind {
        ArtifactKind::Docker
    }

    fn verify(&self) -> Result<()> {
        ensure_tool(&self.program)
    }

    fn calculate_checksum(&self, reporter: &mut dyn Reporter) -> Result<String> {
        let rules =
            IgnoreRules::new(&[".git"]).with_ignore_file(&self.directory, ".dockerignore")?;
        let checksum = hash_directory(&self.directory, &rules)?;
        reporter.info(&format!("Checksum: {checksum}"));
        Ok(checksum)
    }

    /// The image is built per asset as part of `push`.
    fn build(&self, reporter: &mut dyn Reporter) -> Result<()> {
        reporter.debug("docker images are built when pushed");
        Ok(())
    }

    fn test(&self, _reporter: &mut dyn Reporter) -> Result<()> {
        Ok(())
    }

    fn push(
        &self,
        name: &str,
        version: &str,
        commit: Option<&str>,
        reporter: &mut dyn Reporter,
    ) -> Result<Artifact> {
        let local = Self::local_build_tag(name);
        progress(
            reporter,
            &format!("Building local docker image: {local}"),
            |r| {
                let result = run_tool(&self.program, &["build", "-t", &local, "."], &self.directory, r)?;
                build_step(&result, "docker build")
            },
        )?;

        let tags = self.tags(name, version, commit)?;
        progress(reporter, "Tagging docker image", |r| {
            for tag in &tags {
                r.info(&format!("Tagging {local} as {tag}"));
                self.docker(&["tag", &local, tag], r)?;
            }
            Ok(())
        })?;

        for tag in &tags {
            progress(reporter, &format!("Pushing docker image: {tag}"), |r| {
                self.docker(&["push", tag], r)
            })?;
        }

        let image = self.image_name(name);
        Artifact::new(
            ArtifactKind::Docker.type_name(),
            &DockerDetails {
                primary: format!("{image}:{version}"),
                name: image,
                tags,
            },
        )
    }

    fn pull(
        &self,
        artifact: &Artifact,
        _target: &Path,
        _registry: &dyn RegistryApi,
        reporter: &mut dyn Reporter,
    ) -> Result<()> {
        let details: DockerDetails = artifact.details_as()?;
        progress(
            reporter,
            &format!("Pulling docker image: {}", details.primary),
            |r| self.docker(&["pull", &details.primary], r),
        )
    }

    /// Copies the build context, so the installed entry still builds as an
    /// image when it is published as a `local` dependency.
    fn install(&self, source: &Path, target: &Path) -> Result<()> {
        let rules = IgnoreRules::new(&[".git"]).with_ignore_file(source, ".dockerignore")?;
        copy_tree(source, target, &rules)?;
        let mut names: Vec<&str> = DEFINITION_FILES.to_vec();
        names.extend([DOCKERFILE, "README.md"]);
        copy_named(source, target, &names)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{CollectingReporter, FakeRegistry, fake_tool, read_log, write_file};
    use blockship_config::DockerConfig;
    use serial_test::serial;
    use tempfile::tempdir;

    fn config_with_host(host: Option<&str>) -> Config {
        Config {
            docker: DockerConfig {
                registry: host.map(str::to_string),
            },
            ..Config::default()
        }
    }

    #[test]
    fn image_names_and_tags() {
        let td = tempdir().expect("tempdir");
        let plain = DockerHandler::new(td.path(), &config_with_host(None));
        assert_eq!(plain.image_name("Acme/Users"), "acme/users");
        assert_eq!(DockerHandler::local_build_tag("Acme/Users"), "acme/users:local");

        let hosted = DockerHandler::new(td.path(), &config_with_host(Some("docker.example.com/")));
        assert_eq!(
            hosted.tags("acme/users", "1.2.3", Some("abc123")).expect("tags"),
            vec![
                "docker.example.com/acme/users:1.2.3",
                "docker.example.com/acme/users:1.2",
                "docker.example.com/acme/users:1",
                "docker.example.com/acme/users:abc123",
            ]
        );
        assert_eq!(plain.tags("acme/users", "2.0.0", None).expect("tags").len(), 3);
        assert!(plain.tags("acme/users", "local", None).is_err());
    }

    #[test]
    fn checksum_ignores_dockerignore_entries() {
        let td = tempdir().expect("tempdir");
        write_file(&td.path().join("Dockerfile"), "FROM scratch\n");
        write_file(&td.path().join(".dockerignore"), "*.tmp\n");
        let handler = DockerHandler::new(td.path(), &Config::default());
        let mut reporter = CollectingReporter::default();

        let before = handler.calculate_checksum(&mut reporter).expect("checksum");
        write_file(&td.path().join("scratch.tmp"), "x");
        assert_eq!(before, handler.calculate_checksum(&mut reporter).expect("checksum"));
        assert_eq!(reporter.infos[0], format!("Checksum: {before}"));
    }

    #[cfg(unix)]
    #[test]
    #[serial]
    fn push_builds_tags_and_pushes() {
        let td = tempdir().expect("tempdir");
        let bin = tempdir().expect("bin");
        let log = td.path().join("docker.log");
        let docker = fake_tool(bin.path(), "docker", &log, 0);
        write_file(&td.path().join("Dockerfile"), "FROM scratch\n");

        temp_env::with_var(DOCKER_BIN_ENV, Some(docker.to_str().expect("utf8")), || {
            let handler = DockerHandler::new(td.path(), &Config::default());
            let mut reporter = CollectingReporter::default();
            let artifact = handler
                .push("acme/users", "1.4.0", Some("abc"), &mut reporter)
                .expect("push");

            assert_eq!(artifact.kind, "docker");
            let details: DockerDetails = artifact.details_as().expect("details");
            assert_eq!(details.name, "acme/users");
            assert_eq!(details.primary, "acme/users:1.4.0");
            assert_eq!(details.tags.len(), 4);

            let calls = read_log(&log);
            assert_eq!(calls[0], "build -t acme/users:local .");
            assert_eq!(calls[1], "tag acme/users:local acme/users:1.4.0");
            assert_eq!(calls.iter().filter(|c| c.starts_with("push ")).count(), 4);
            assert_eq!(calls.last().map(String::as_str), Some("push acme/users:abc"));
        });
    }

    #[cfg(unix)]
    #[test]
    #[serial]
    fn failed_image_build_is_a_build_failure() {
        let td = tempdir().expect("tempdir");
        let bin = tempdir().expect("bin");
        let docker = fake_tool(bin.path(), "docker", &td.path().join("docker.log"), 1);

        temp_env::with_var(DOCKER_BIN_ENV, Some(docker.to_str().expect("utf8")), || {
            let handler = DockerHandler::new(td.path(), &Config::default());
            let err = handler
                .push("acme/users", "1.0.0", None, &mut CollectingReporter::default())
                .unwrap_err();
            assert!(err.to_string().starts_with("Build failed: docker build failed"), "{err}");
        });
    }

    #[cfg(unix)]
    #[test]
    #[serial]
    fn pull_fetches_the_primary_image() {
        let td = tempdir().expect("tempdir");
        let bin = tempdir().expect("bin");
        let log = td.path().join("docker.log");
        let docker = fake_tool(bin.path(), "docker", &log, 0);

        temp_env::with_var(DOCKER_BIN_ENV, Some(docker.to_str().expect("utf8")), || {
            let handler = DockerHandler::new(td.path(), &Config::default());
            let artifact = Artifact::new(
                "docker",
                &DockerDetails {
                    name: "acme/users".into(),
                    primary: "acme/users:1.0.0".into(),
                    tags: vec![],
                },
            )
            .expect("artifact");
            handler
                .pull(&artifact, td.path(), &FakeRegistry::default(), &mut CollectingReporter::default())
                .expect("pull");
            assert_eq!(read_log(&log), vec!["pull acme/users:1.0.0"]);
        });
    }

    #[test]
    fn install_copies_the_build_context() {
        let source = tempdir().expect("tempdir");
        let target = tempdir().expect("tempdir");
        write_file(&source.path().join("blockship.yml"), "kind: x");
        write_file(&source.path().join("Dockerfile"), "FROM scratch");
        write_file(&source.path().join("src/main.go"), "package main");
        write_file(&source.path().join("build.tmp"), "x");
        write_file(&source.path().join(".dockerignore"), "*.tmp\nDockerfile\n");
        write_file(&source.path().join(".git/HEAD"), "ref: refs/heads/main");

        DockerHandler::new(source.path(), &Config::default())
            .install(source.path(), target.path())
            .expect("install");

        assert!(target.path().join("blockship.yml").is_file());
        assert!(target.path().join("Dockerfile").is_file());
        assert!(target.path().join("src/main.go").is_file());
        assert!(!target.path().join("build.tmp").exists());
        assert!(!target.path().join(".git").exists());
        assert!(ArtifactKind::Docker.is_supported(target.path()));
    }
}
