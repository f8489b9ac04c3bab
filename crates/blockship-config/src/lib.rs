//! Configuration file handling for blockship.
//!
//! Settings live in `$BLOCKSHIP_HOME/config.toml` (default
//! `~/.blockship/config.toml`). A missing file yields defaults, the
//! `BLOCKSHIP_REGISTRY_URL` variable overrides the registry URL, and CLI flags
//! are layered on top with [`Config::merge`].
//!
//! ```toml
//! [registry]
//! url = "https://registry.example.com"
//!
//! [docker]
//! registry = "docker.example.com"
//!
//! [repository]
//! path = "/var/cache/blockship"
//! ```
//!
//! # Example
//!
//! ```
//! use blockship_config::load_config;
//!
//! let config = load_config().expect("load config");
//! let target = config.repository_path("acme", "users", "1.0.0");
//! println!("{}", target.display());
//! ```

use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Default configuration file name
pub const CONFIG_FILE: &str = "config.toml";

/// Environment variable overriding the blockship home directory
pub const HOME_ENV: &str = "BLOCKSHIP_HOME";

/// Environment variable overriding the registry URL
pub const REGISTRY_URL_ENV: &str = "BLOCKSHIP_REGISTRY_URL";

pub const DEFAULT_REGISTRY_URL: &str = "https://registry.blockship.io";

/// `$BLOCKSHIP_HOME`, else `~/.blockship`.
pub fn home_dir() -> PathBuf {
    if let Some(path) = env::var_os(HOME_ENV).filter(|p| !p.is_empty()) {
        return PathBuf::from(path);
    }
    match dirs::home_dir() {
        Some(home) => home.join(".blockship"),
        None => PathBuf::from(".blockship"),
    }
}

/// Get the config file path for a directory
pub fn config_path(dir: &Path) -> PathBuf {
    dir.join(CONFIG_FILE)
}

/// Complete blockship configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub docker: DockerConfig,
    #[serde(default)]
    pub npm: PackageRegistryConfig,
    #[serde(default)]
    pub maven: PackageRegistryConfig,
    #[serde(default)]
    pub repository: RepositoryConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Registry API URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DockerConfig {
    /// Image host prefix (e.g. `docker.example.com`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<String>,
}

/// Upload target for package-manager artifacts (npm, maven).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PackageRegistryConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Root of the local asset repository
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry API URL: environment, then file, then the built-in default.
    pub fn registry_url(&self) -> String {
        env::var(REGISTRY_URL_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .or_else(|| self.registry.url.clone())
            .unwrap_or_else(|| DEFAULT_REGISTRY_URL.to_string())
            .trim_end_matches('/')
            .to_string()
    }

    pub fn docker_registry(&self) -> Option<&str> {
        self.docker.registry.as_deref().filter(|r| !r.is_empty())
    }

    /// npm registry, defaulting to `<registry url>/npm`.
    pub fn npm_registry(&self) -> String {
        self.npm
            .registry
            .clone()
            .unwrap_or_else(|| format!("{}/npm", self.registry_url()))
    }

    /// Maven repository, defaulting to `<registry url>/maven`.
    pub fn maven_registry(&self) -> String {
        self.maven
            .registry
            .clone()
            .unwrap_or_else(|| format!("{}/maven", self.registry_url()))
    }

    /// Root of the local asset repository (default `<home>/repository`).
    pub fn repository_root(&self) -> PathBuf {
        self.repository
            .path
            .clone()
            .unwrap_or_else(|| home_dir().join("repository"))
    }

    /// `<repository>/<handle>/<name>/<version>`
    pub fn repository_path(&self, handle: &str, name: &str, version: &str) -> PathBuf {
        self.repository_root().join(handle).join(name).join(version)
    }

    /// Values set in `other` win.
    pub fn merge(&self, other: &Config) -> Config {
        Config {
            registry: RegistryConfig {
                url: other.registry.url.clone().or_else(|| self.registry.url.clone()),
            },
            docker: DockerConfig {
                registry: other
                    .docker
                    .registry
                    .clone()
                    .or_else(|| self.docker.registry.clone()),
            },
            npm: PackageRegistryConfig {
                registry: other.npm.registry.clone().or_else(|| self.npm.registry.clone()),
            },
            maven: PackageRegistryConfig {
                registry: other
                    .maven
                    .registry
                    .clone()
                    .or_else(|| self.maven.registry.clone()),
            },
            repository: RepositoryConfig {
                path: other
                    .repository
                    .path
                    .clone()
                    .or_else(|| self.repository.path.clone()),
            },
        }
    }
}

/// Load `config.toml` from the blockship home directory
pub fn load_config() -> Result<Config> {
    load_config_from_file(&config_path(&home_dir()))
}

/// Load configuration from a specific file path
pub fn load_config_from_file(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("failed to parse config file: {}", path.display()))?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::tempdir;

    #[test]
    #[serial]
    fn missing_file_yields_defaults() {
        let td = tempdir().expect("tempdir");
        temp_env::with_vars(
            [
                (HOME_ENV, Some(td.path().to_str().expect("utf8"))),
                (REGISTRY_URL_ENV, None),
            ],
            || {
                let config = load_config().expect("load");
                assert_eq!(config, Config::default());
                assert_eq!(config.registry_url(), DEFAULT_REGISTRY_URL);
                assert_eq!(config.repository_root(), td.path().join("repository"));
                assert_eq!(config.docker_registry(), None);
            },
        );
    }

    #[test]
    #[serial]
    fn loads_all_sections() {
        let td = tempdir().expect("tempdir");
        std::fs::write(
            config_path(td.path()),
            r#"
[registry]
url = "https://registry.example.com/"

[docker]
registry = "docker.example.com"

[npm]
registry = "https://npm.example.com"

[repository]
path = "/srv/blocks"
"#,
        )
        .expect("write");

        temp_env::with_vars(
            [
                (HOME_ENV, Some(td.path().to_str().expect("utf8"))),
                (REGISTRY_URL_ENV, None),
            ],
            || {
                let config = load_config().expect("load");
                assert_eq!(config.registry_url(), "https://registry.example.com");
                assert_eq!(config.docker_registry(), Some("docker.example.com"));
                assert_eq!(config.npm_registry(), "https://npm.example.com");
                assert_eq!(config.maven_registry(), "https://registry.example.com/maven");
                assert_eq!(
                    config.repository_path("acme", "users", "1.2.3"),
                    PathBuf::from("/srv/blocks/acme/users/1.2.3")
                );
            },
        );
    }

    #[test]
    #[serial]
    fn env_overrides_registry_url() {
        let mut config = Config::new();
        config.registry.url = Some("https://from-file".into());
        temp_env::with_var(REGISTRY_URL_ENV, Some("https://from-env"), || {
            assert_eq!(config.registry_url(), "https://from-env");
        });
    }

    #[test]
    fn invalid_toml_is_reported() {
        let td = tempdir().expect("tempdir");
        let path = config_path(td.path());
        std::fs::write(&path, "[registry\nurl = 1").expect("write");
        let err = load_config_from_file(&path).unwrap_err();
        assert!(err.to_string().starts_with("failed to parse config file"));
    }

    #[test]
    fn merge_prefers_other() {
        let mut base = Config::new();
        base.registry.url = Some("https://base".into());
        base.docker.registry = Some("docker.base".into());

        let mut cli = Config::new();
        cli.registry.url = Some("https://cli".into());

        let merged = base.merge(&cli);
        assert_eq!(merged.registry.url.as_deref(), Some("https://cli"));
        assert_eq!(merged.docker.registry.as_deref(), Some("docker.base"));
    }

    #[test]
    #[serial]
    fn home_dir_respects_env() {
        temp_env::with_var(HOME_ENV, Some("/opt/blockship"), || {
            assert_eq!(home_dir(), PathBuf::from("/opt/blockship"));
        });
    }
}
