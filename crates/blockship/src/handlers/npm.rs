//! NPM packages, built and published with the `npm` CLI.

use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, bail};
use blockship_config::Config;
use blockship_process::program_from_env;
use blockship_registry::RegistryApi;
use blockship_types::{Artifact, NpmDetails, split_full_name};
use flate2::read::GzDecoder;
use serde_json::Value;

use super::{
    ArtifactHandler, ArtifactKind, NPM_BIN_ENV, build_step, ensure_tool, run_tool, test_step,
};
use crate::checksum::{IgnoreRules, hash_directory};
use crate::files::{FileBackup, copy_tree, files_with_extension};
use crate::reporter::{Reporter, progress};

const MANIFEST: &str = "package.json";

pub struct NpmHandler {
    directory: PathBuf,
    registry: String,
    program: String,
}

/// `handle/name` becomes the scoped package `@handle/name`.
pub fn package_name(full_name: &str) -> Result<String> {
    let (handle, name) = split_full_name(full_name)?;
    Ok(format!("@{handle}/{name}").to_lowercase())
}

impl NpmHandler {
    pub fn new(directory: &Path, config: &Config) -> Self {
        Self {
            directory: directory.to_path_buf(),
            registry: config.npm_registry(),
            program: program_from_env(NPM_BIN_ENV, "npm"),
        }
    }

    fn npm(&self, args: &[&str], dir: &Path, reporter: &mut dyn Reporter) -> Result<()> {
        let result = run_tool(&self.program, args, dir, reporter)?;
        result.ok(&format!("npm {}", args.first().copied().unwrap_or_default()))?;
        Ok(())
    }

    fn rewrite_manifest(&self, package: &str, version: &str) -> Result<()> {
        let path = self.directory.join(MANIFEST);
        let content =
            fs::read_to_string(&path).with_context(|| format!("failed to read {}", path.display()))?;
        let mut manifest: Value = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        let Some(fields) = manifest.as_object_mut() else {
            bail!("{} must contain a JSON object", path.display());
        };
        fields.insert("name".to_string(), Value::String(package.to_string()));
        fields.insert("version".to_string(), Value::String(version.to_string()));
        fs::write(&path, serde_json::to_string_pretty(&manifest)?)
            .with_context(|| format!("failed to write {}", path.display()))
    }
}

impl ArtifactHandler for NpmHandler {
    fn kind(&self) -> ArtifactKind {
        ArtifactKind::Npm
    }

    fn verify(&self) -> Result<()> {
        ensure_tool(&self.program)
    }

    fn calculate_checksum(&self, reporter: &mut dyn Reporter) -> Result<String> {
        let rules = IgnoreRules::new(&[".git", "node_modules"])
            .with_ignore_file(&self.directory, ".npmignore")?;
        let checksum = hash_directory(&self.directory, &rules)?;
        reporter.info(&format!("Checksum: {checksum}"));
        Ok(checksum)
    }

    fn build(&self, reporter: &mut dyn Reporter) -> Result<()> {
        let install = run_tool(&self.program, &["install"], &self.directory, reporter)?;
        build_step(&install, "npm install")?;
        let build = run_tool(
            &self.program,
            &["run", "build", "--if-present"],
            &self.directory,
            reporter,
        )?;
        build_step(&build, "npm run build")
    }

    fn test(&self, reporter: &mut dyn Reporter) -> Result<()> {
        let result = run_tool(&self.program, &["test", "--if-present"], &self.directory, reporter)?;
        test_step(&result, "npm test")
    }

    fn push(
        &self,
        name: &str,
        version: &str,
        _commit: Option<&str>,
        reporter: &mut dyn Reporter,
    ) -> Result<Artifact> {
        let package = package_name(name)?;
        let backup = FileBackup::new(&self.directory.join(MANIFEST))?;
        self.rewrite_manifest(&package, version)?;

        progress(
            reporter,
            &format!("Publishing {package}@{version} to {}", self.registry),
            |r| {
                self.npm(
                    &["publish", "--registry", &self.registry],
                    &self.directory,
                    r,
                )
            },
        )?;
        backup.restore()?;

        Artifact::new(
            ArtifactKind::Npm.type_name(),
            &NpmDetails {
                name: package,
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
        let details: NpmDetails = artifact.details_as()?;
        fs::create_dir_all(target)
            .with_context(|| format!("failed to create {}", target.display()))?;

        let spec = format!("{}@{}", details.name, details.version);
        progress(reporter, &format!("Pulling npm package: {spec}"), |r| {
            self.npm(&["pack", &spec, "--registry", &details.registry], target, r)
        })?;

        let Some(tarball) = files_with_extension(target, "tgz")?.into_iter().next() else {
            bail!("npm pack produced no tarball in {}", target.display());
        };
        extract_package(&tarball, target)?;
        fs::remove_file(&tarball)
            .with_context(|| format!("failed to remove {}", tarball.display()))
    }

    fn install(&self, source: &Path, target: &Path) -> Result<()> {
        copy_tree(source, target, &IgnoreRules::new(&[".git", "node_modules"]))?;
        Ok(())
    }
}

/// Unpacks an `npm pack` tarball, dropping its leading `package/` directory.
pub fn extract_package(tarball: &Path, target: &Path) -> Result<()> {
    let file = fs::File::open(tarball)
        .with_context(|| format!("failed to open {}", tarball.display()))?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));
    let entries = archive
        .entries()
        .with_context(|| format!("failed to read {}", tarball.display()))?;

    for entry in entries {
        let mut entry = entry.with_context(|| format!("failed to read {}", tarball.display()))?;
        let path = entry.path()?.into_owned();
        let mut components = path.components();
        components.next();
        let relative: PathBuf = components.collect();
        if relative.as_os_str().is_empty() {
            continue;
        }
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            bail!("refusing to extract {} outside {}", path.display(), target.display());
        }
        let destination = target.join(&relative);
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        entry
            .unpack(&destination)
            .with_context(|| format!("failed to extract {}", destination.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{CollectingReporter, FakeRegistry, fake_tool, read_log, write_file};
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use serial_test::serial;
    use tempfile::tempdir;

    fn write_tarball(path: &Path, files: &[(&str, &str)]) {
        let file = fs::File::create(path).expect("create");
        let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
        for (name, body) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(body.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, name, body.as_bytes())
                .expect("append");
        }
        builder
            .into_inner()
            .expect("tar")
            .finish()
            .expect("gzip");
    }

    #[test]
    fn scoped_package_names() {
        assert_eq!(package_name("Acme/Users").expect("name"), "@acme/users");
        assert!(package_name("users").is_err());
    }

    #[test]
    fn checksum_skips_node_modules_and_npmignore() {
        let td = tempdir().expect("tempdir");
        write_file(&td.path().join("package.json"), "{}");
        write_file(&td.path().join(".npmignore"), "coverage\n");
        let handler = NpmHandler::new(td.path(), &Config::default());
        let mut reporter = CollectingReporter::default();
        let before = handler.calculate_checksum(&mut reporter).expect("checksum");

        write_file(&td.path().join("node_modules/left-pad/index.js"), "x");
        write_file(&td.path().join("coverage/lcov.info"), "x");
        assert_eq!(before, handler.calculate_checksum(&mut reporter).expect("checksum"));

        write_file(&td.path().join("index.js"), "x");
        assert_ne!(before, handler.calculate_checksum(&mut reporter).expect("checksum"));
    }

    #[test]
    fn extracts_package_contents() {
        let td = tempdir().expect("tempdir");
        let tarball = td.path().join("users-1.0.0.tgz");
        write_tarball(
            &tarball,
            &[("package/package.json", "{}"), ("package/lib/index.js", "module.exports = 1;")],
        );
        let target = td.path().join("out");
        extract_package(&tarball, &target).expect("extract");
        assert_eq!(fs::read_to_string(target.join("package.json")).expect("read"), "{}");
        assert!(target.join("lib/index.js").is_file());
    }

    #[cfg(unix)]
    #[test]
    #[serial]
    fn push_rewrites_manifest_and_restores_it() {
        let td = tempdir().expect("tempdir");
        let bin = tempdir().expect("bin");
        let log = td.path().join("npm.log");
        let manifest = td.path().join("package.json");
        let original = "{\n  \"name\": \"users\",\n  \"version\": \"0.0.0\"\n}\n";
        write_file(&manifest, original);
        let snapshot = td.path().join("published.json");
        let npm = fake_tool(bin.path(), "npm", &log, 0);
        // Captures the manifest as npm saw it.
        let wrapper = bin.path().join("npm-wrapper");
        write_file(
            &wrapper,
            &format!(
                "#!/bin/sh\ncp package.json '{}'\nexec '{}' \"$@\"\n",
                snapshot.display(),
                npm.display()
            ),
        );
        crate::test_support::make_executable(&wrapper);

        temp_env::with_vars(
            [
                (NPM_BIN_ENV, Some(wrapper.to_str().expect("utf8"))),
                ("BLOCKSHIP_REGISTRY_URL", Some("https://registry.test")),
            ],
            || {
                let handler = NpmHandler::new(td.path(), &Config::default());
                let artifact = handler
                    .push("acme/users", "1.2.0", None, &mut CollectingReporter::default())
                    .expect("push");
                let details: NpmDetails = artifact.details_as().expect("details");
                assert_eq!(details.name, "@acme/users");
                assert_eq!(details.registry, "https://registry.test/npm");
            },
        );

        assert_eq!(fs::read_to_string(&manifest).expect("read"), original);
        let published: Value =
            serde_json::from_str(&fs::read_to_string(&snapshot).expect("read")).expect("json");
        assert_eq!(published["name"], "@acme/users");
        assert_eq!(published["version"], "1.2.0");
        assert_eq!(read_log(&log), vec!["publish --registry https://registry.test/npm"]);
    }

    #[cfg(unix)]
    #[test]
    #[serial]
    fn failed_publish_still_restores_manifest() {
        let td = tempdir().expect("tempdir");
        let bin = tempdir().expect("bin");
        let manifest = td.path().join("package.json");
        write_file(&manifest, "{\"name\":\"users\"}");
        let npm = fake_tool(bin.path(), "npm", &td.path().join("npm.log"), 1);

        temp_env::with_var(NPM_BIN_ENV, Some(npm.to_str().expect("utf8")), || {
            let handler = NpmHandler::new(td.path(), &Config::default());
            let err = handler
                .push("acme/users", "1.2.0", None, &mut CollectingReporter::default())
                .unwrap_err();
            assert!(err.to_string().starts_with("npm publish failed"), "{err}");
        });
        assert_eq!(fs::read_to_string(&manifest).expect("read"), "{\"name\":\"users\"}");
    }

    #[cfg(unix)]
    #[test]
    #[serial]
    fn build_and_test_failures_are_classified() {
        let td = tempdir().expect("tempdir");
        let bin = tempdir().expect("bin");
        let log = td.path().join("npm.log");
        let npm = fake_tool(bin.path(), "npm", &log, 2);

        temp_env::with_var(NPM_BIN_ENV, Some(npm.to_str().expect("utf8")), || {
            let handler = NpmHandler::new(td.path(), &Config::default());
            let mut reporter = CollectingReporter::default();
            let build = handler.build(&mut reporter).unwrap_err().to_string();
            assert!(build.starts_with("Build failed: npm install failed"), "{build}");
            let test = handler.test(&mut reporter).unwrap_err().to_string();
            assert!(test.starts_with("Tests failed: npm test failed"), "{test}");
        });
        assert_eq!(read_log(&log), vec!["install", "test --if-present"]);
    }

    #[cfg(unix)]
    #[test]
    #[serial]
    fn pull_packs_and_extracts() {
        let td = tempdir().expect("tempdir");
        let bin = tempdir().expect("bin");
        let fixture = td.path().join("fixture.tgz");
        write_tarball(&fixture, &[("package/package.json", "{\"name\":\"@acme/users\"}")]);
        let log = td.path().join("npm.log");
        let npm = bin.path().join("npm");
        write_file(
            &npm,
            &format!(
                "#!/bin/sh\necho \"$@\" >> '{}'\ncp '{}' ./acme-users-1.0.0.tgz\n",
                log.display(),
                fixture.display()
            ),
        );
        crate::test_support::make_executable(&npm);
        let target = td.path().join("target");

        temp_env::with_var(NPM_BIN_ENV, Some(npm.to_str().expect("utf8")), || {
            let handler = NpmHandler::new(&target, &Config::default());
            let artifact = Artifact::new(
                "npm",
                &NpmDetails {
                    name: "@acme/users".into(),
                    version: "1.0.0".into(),
                    registry: "https://npm.test".into(),
                },
            )
            .expect("artifact");
            handler
                .pull(&artifact, &target, &FakeRegistry::default(), &mut CollectingReporter::default())
                .expect("pull");
        });

        assert!(target.join("package.json").is_file());
        assert!(!target.join("acme-users-1.0.0.tgz").exists());
        assert_eq!(
            read_log(&log),
            vec!["pack @acme/users@1.0.0 --registry https://npm.test"]
        );
    }
}
