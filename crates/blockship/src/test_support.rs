//! Fakes and fixtures shared by the unit tests.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Result, bail};
use blockship_registry::{RegistryApi, ReserveRequest};
use blockship_semver::parse_version;
use blockship_types::{
    AssetDefinition, AssetMetadata, AssetVersion, CURRENT_VERSION, Reservation, ReservedVersion,
};

use crate::reporter::Reporter;

#[derive(Default)]
pub struct CollectingReporter {
    pub infos: Vec<String>,
    pub warns: Vec<String>,
    pub errors: Vec<String>,
    pub debugs: Vec<String>,
}

impl Reporter for CollectingReporter {
    fn info(&mut self, msg: &str) {
        self.infos.push(msg.to_string());
    }

    fn warn(&mut self, msg: &str) {
        self.warns.push(msg.to_string());
    }

    fn error(&mut self, msg: &str) {
        self.errors.push(msg.to_string());
    }

    fn debug(&mut self, msg: &str) {
        self.debugs.push(msg.to_string());
    }
}

pub fn write_file(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("mkdir");
    }
    fs::write(path, content).expect("write");
}

#[cfg(unix)]
pub fn make_executable(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    let mut perms = fs::metadata(path).expect("meta").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).expect("chmod");
}

/// A tool that appends its arguments to `log` and exits with `exit_code`.
#[cfg(unix)]
pub fn fake_tool(bin_dir: &Path, name: &str, log: &Path, exit_code: i32) -> PathBuf {
    let path = bin_dir.join(name);
    write_file(
        &path,
        &format!(
            "#!/usr/bin/env sh\necho \"$@\" >> '{}'\nexit {exit_code}\n",
            log.display()
        ),
    );
    make_executable(&path);
    path
}

pub fn read_log(log: &Path) -> Vec<String> {
    fs::read_to_string(log)
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

/// Runs git and returns stdout, failing the test on a non-zero exit.
pub fn git(dir: &Path, args: &[&str]) -> String {
    let out = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("git");
    assert!(
        out.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&out.stderr)
    );
    String::from_utf8_lossy(&out.stdout).to_string()
}

pub fn init_git_repo(dir: &Path) {
    git(dir, &["init", "-q"]);
    git(dir, &["checkout", "-q", "-b", "main"]);
    git(dir, &["config", "user.email", "test@example.com"]);
    git(dir, &["config", "user.name", "Test User"]);
    git(dir, &["config", "commit.gpgsign", "false"]);
    git(dir, &["config", "tag.gpgsign", "false"]);
}

pub fn make_commit(dir: &Path, msg: &str) {
    git(dir, &["add", "-A"]);
    git(dir, &["commit", "-q", "--allow-empty", "-m", msg]);
}

pub fn bare_remote(root: &Path) -> PathBuf {
    let remote = root.join("remote.git");
    fs::create_dir_all(&remote).expect("mkdir");
    git(&remote, &["init", "-q", "--bare"]);
    remote
}

pub fn definition(name: &str, version: &str) -> AssetDefinition {
    AssetDefinition {
        kind: "core/block-type-service:1.0.0".to_string(),
        metadata: AssetMetadata {
            name: Some(name.to_string()),
            version: Some(version.to_string()),
            ..AssetMetadata::default()
        },
        ..AssetDefinition::default()
    }
}

/// In-memory registry: echoes requested versions back as reservations and
/// records every call.
#[derive(Default)]
pub struct FakeRegistry {
    pub registered: RefCell<BTreeMap<(String, String), AssetVersion>>,
    pub reserve_requests: RefCell<Vec<ReserveRequest>>,
    pub commits: RefCell<Vec<(String, Vec<AssetVersion>)>>,
    pub aborts: RefCell<Vec<String>>,
    /// Makes `reserve` return nothing.
    pub refuse_reservations: Cell<bool>,
    pub fail_commit: Cell<bool>,
    pub fail_abort: Cell<bool>,
    next_id: Cell<u32>,
}

impl FakeRegistry {
    pub fn register(&self, content: AssetDefinition, checksum: &str) {
        let name = content.name().unwrap_or_default().to_string();
        let version = content.version().unwrap_or_default().to_string();
        self.registered.borrow_mut().insert(
            (name, version),
            AssetVersion {
                content,
                checksum: checksum.to_string(),
                readme: None,
                repository: None,
                artifact: None,
            },
        );
    }

    pub fn committed_versions(&self) -> Vec<String> {
        self.commits
            .borrow()
            .iter()
            .flat_map(|(_, versions)| versions.iter())
            .filter_map(|v| v.content.reference().ok())
            .map(|r| r.to_string())
            .collect()
    }

    fn versions_of(&self, full_name: &str) -> Vec<(String, AssetVersion)> {
        let mut versions: Vec<_> = self
            .registered
            .borrow()
            .iter()
            .filter(|((name, _), _)| name == full_name)
            .filter_map(|((_, version), registered)| {
                parse_version(version)
                    .ok()
                    .map(|info| (info, version.clone(), registered.clone()))
            })
            .collect();
        versions.sort_by_key(|(info, _, _)| (info.major, info.minor, info.patch));
        versions.into_iter().map(|(_, v, r)| (v, r)).collect()
    }
}

impl RegistryApi for FakeRegistry {
    fn base_url(&self) -> &str {
        "http://registry.test"
    }

    fn reserve(&self, request: &ReserveRequest) -> Result<Option<Reservation>> {
        self.reserve_requests.borrow_mut().push(request.clone());
        if self.refuse_reservations.get() {
            return Ok(None);
        }
        let id = self.next_id.get() + 1;
        self.next_id.set(id);

        let registered = self.registered.borrow();
        let versions = request
            .assets
            .iter()
            .map(|asset| {
                let name = asset.name().unwrap_or_default().to_string();
                let version = asset.version().unwrap_or_default().to_string();
                let exists = registered
                    .get(&(name, version.clone()))
                    .is_some_and(|r| Some(&r.checksum) == request.checksum.as_ref());
                ReservedVersion {
                    version,
                    content: asset.clone(),
                    exists,
                }
            })
            .collect();
        Ok(Some(Reservation {
            id: format!("res-{id}"),
            expires: None,
            versions,
        }))
    }

    fn commit(&self, reservation_id: &str, versions: &[AssetVersion]) -> Result<()> {
        if self.fail_commit.get() {
            bail!("registry responded with 409 Conflict: reservation expired");
        }
        self.commits
            .borrow_mut()
            .push((reservation_id.to_string(), versions.to_vec()));
        for version in versions {
            self.register(version.content.clone(), &version.checksum);
        }
        Ok(())
    }

    fn abort(&self, reservation_id: &str) -> Result<()> {
        self.aborts.borrow_mut().push(reservation_id.to_string());
        if self.fail_abort.get() {
            bail!("Failed to reach registry at {}. Please check your settings and try again.", self.base_url());
        }
        Ok(())
    }

    fn get_version(&self, full_name: &str, version: &str) -> Result<Option<AssetVersion>> {
        if version == CURRENT_VERSION {
            return Ok(self.versions_of(full_name).pop().map(|(_, r)| r));
        }
        Ok(self
            .registered
            .borrow()
            .get(&(full_name.to_string(), version.to_string()))
            .cloned())
    }

    fn get_latest_version_before(&self, full_name: &str, version: &str) -> Result<Option<AssetVersion>> {
        let bound = parse_version(version)?;
        Ok(self
            .versions_of(full_name)
            .into_iter()
            .filter(|(v, _)| {
                parse_version(v).is_ok_and(|info| {
                    (info.major, info.minor, info.patch) < (bound.major, bound.minor, bound.patch)
                })
            })
            .map(|(_, r)| r)
            .next_back())
    }
}
