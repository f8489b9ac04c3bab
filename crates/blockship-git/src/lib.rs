//! Git operations for blockship.
//!
//! Everything goes through the `git` CLI (overridable with
//! `BLOCKSHIP_GIT_BIN`): working-tree checks before a push, the commit and
//! checkout snapshot recorded with each version, and tagging/pushing after a
//! successful publish.
//!
//! # Example
//!
//! ```
//! use blockship_git::{is_git_repo, is_git_clean};
//! use std::path::Path;
//!
//! if is_git_repo(Path::new(".")) {
//!     let clean = is_git_clean(Path::new(".")).unwrap_or(false);
//!     println!("clean: {clean}");
//! }
//! ```

use std::path::Path;

use anyhow::{Result, bail};
use blockship_process::{CommandResult, program_from_env, run_command_in_dir};
use serde::{Deserialize, Serialize};

/// Where a published version can be checked out from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutInfo {
    pub url: String,
    pub remote: String,
    pub branch: String,
    /// Directory of the asset relative to the repository root (`.` or `./sub/dir`).
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Remote {
    pub name: String,
    pub url: String,
}

pub fn git_program() -> String {
    program_from_env("BLOCKSHIP_GIT_BIN", "git")
}

fn git(path: &Path, args: &[&str]) -> Result<CommandResult> {
    run_command_in_dir(&git_program(), args, path)
}

fn git_ok(path: &Path, args: &[&str]) -> Result<String> {
    let result = git(path, args)?;
    result.ok(&format!("git {}", args.join(" ")))?;
    Ok(result.stdout.trim().to_string())
}

/// Check if we're inside a git work tree
pub fn is_git_repo(path: &Path) -> bool {
    git(path, &["rev-parse", "--is-inside-work-tree"])
        .map(|r| r.success && r.stdout.trim() == "true")
        .unwrap_or(false)
}

/// Fetch remote refs so that "behind" checks see the latest state.
pub fn update_remotes(path: &Path) -> Result<()> {
    git_ok(path, &["remote", "update"])?;
    Ok(())
}

/// True when there are no staged, unstaged, or untracked changes.
pub fn is_git_clean(path: &Path) -> Result<bool> {
    Ok(git_ok(path, &["status", "--porcelain"])?.is_empty())
}

/// Changed paths as reported by `git status --porcelain`.
pub fn get_changed_files(path: &Path) -> Result<Vec<String>> {
    let status = git_ok(path, &["status", "--porcelain"])?;
    Ok(status
        .lines()
        .filter(|line| line.len() > 3)
        .map(|line| line[3..].to_string())
        .collect())
}

/// Commits on the upstream branch that are not in HEAD. Zero without upstream.
pub fn commits_behind(path: &Path) -> Result<u64> {
    let result = git(path, &["rev-list", "--count", "HEAD..@{u}"])?;
    if !result.success {
        return Ok(0);
    }
    Ok(result.stdout.trim().parse().unwrap_or(0))
}

pub fn is_up_to_date(path: &Path) -> Result<bool> {
    Ok(commits_behind(path)? == 0)
}

/// Full hash of HEAD, `None` before the first commit.
pub fn get_commit_hash(path: &Path) -> Result<Option<String>> {
    let result = git(path, &["rev-parse", "HEAD"])?;
    if !result.success {
        return Ok(None);
    }
    Ok(Some(result.stdout.trim().to_string()))
}

/// Current branch name, `None` when detached.
pub fn get_branch(path: &Path) -> Result<Option<String>> {
    let result = git(path, &["rev-parse", "--abbrev-ref", "HEAD"])?;
    if !result.success {
        // Unborn branch: fall back to symbolic-ref.
        let symbolic = git(path, &["symbolic-ref", "--short", "HEAD"])?;
        if symbolic.success {
            return Ok(Some(symbolic.stdout.trim().to_string()));
        }
        return Ok(None);
    }

    let branch = result.stdout.trim().to_string();
    if branch == "HEAD" {
        return Ok(None);
    }
    Ok(Some(branch))
}

pub fn is_main_branch(branch: &str) -> bool {
    matches!(branch, "main" | "master")
}

/// `(remote, branch)` of the upstream the current branch tracks.
pub fn tracking_remote(path: &Path) -> Result<Option<(String, String)>> {
    let result = git(
        path,
        &["rev-parse", "--abbrev-ref", "--symbolic-full-name", "@{u}"],
    )?;
    if !result.success {
        return Ok(None);
    }
    Ok(result
        .stdout
        .trim()
        .split_once('/')
        .map(|(remote, branch)| (remote.to_string(), branch.to_string())))
}

/// Configured remotes with their fetch URLs.
pub fn list_remotes(path: &Path) -> Result<Vec<Remote>> {
    let output = git_ok(path, &["remote", "-v"])?;
    let mut remotes: Vec<Remote> = Vec::new();
    for line in output.lines() {
        let mut parts = line.split_whitespace();
        let (Some(name), Some(url), Some("(fetch)")) = (parts.next(), parts.next(), parts.next())
        else {
            continue;
        };
        if !remotes.iter().any(|r| r.name == name) {
            remotes.push(Remote {
                name: name.to_string(),
                url: url.to_string(),
            });
        }
    }
    Ok(remotes)
}

/// Picks the remote to push to: the tracked one, the only one, `origin`, or
/// a remote hosted on a well-known forge.
pub fn select_remote(path: &Path) -> Result<(String, String)> {
    if let Some(tracking) = tracking_remote(path)? {
        return Ok(tracking);
    }

    let Some(branch) = get_branch(path)? else {
        bail!("cannot pick a git remote: HEAD is detached");
    };

    let remotes = list_remotes(path)?;
    match remotes.as_slice() {
        [] => bail!("No remotes defined for git repository."),
        [only] => return Ok((only.name.clone(), branch)),
        _ => {}
    }

    if let Some(origin) = remotes.iter().find(|r| r.name == "origin") {
        return Ok((origin.name.clone(), branch));
    }
    let forge = remotes.iter().find(|r| {
        let url = r.url.to_ascii_lowercase();
        ["github", "gitlab", "bitbucket"]
            .iter()
            .any(|host| url.contains(host))
    });
    if let Some(remote) = forge {
        return Ok((remote.name.clone(), branch));
    }

    bail!("Failed to identify remote to use and local branch is not tracking any.")
}

pub fn get_remote_url(path: &Path, remote: &str) -> Result<Option<String>> {
    let result = git(path, &["remote", "get-url", remote])?;
    if !result.success {
        return Ok(None);
    }
    Ok(Some(result.stdout.trim().to_string()))
}

/// Checkout coordinates for the asset directory `path`.
pub fn checkout_info(path: &Path) -> Result<CheckoutInfo> {
    let (remote, branch) = select_remote(path)?;
    let Some(url) = get_remote_url(path, &remote)? else {
        bail!(
            "Failed to identify remote checkout url to use. Verify that your local repository is properly configured."
        );
    };

    let top_level = git_ok(path, &["rev-parse", "--show-toplevel"])?;
    let relative = relative_path(Path::new(&top_level), path);

    Ok(CheckoutInfo {
        url,
        remote,
        branch,
        path: relative,
    })
}

fn relative_path(root: &Path, dir: &Path) -> String {
    let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
    let dir = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
    match dir.strip_prefix(&root) {
        Ok(rel) if rel.as_os_str().is_empty() => ".".to_string(),
        Ok(rel) => format!("./{}", rel.to_string_lossy().replace('\\', "/")),
        Err(_) => ".".to_string(),
    }
}

pub fn list_tags(path: &Path) -> Result<Vec<String>> {
    let output = git_ok(path, &["tag", "--list"])?;
    Ok(output
        .lines()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect())
}

/// Creates `tag` on HEAD. Returns `false` when the tag already exists.
pub fn create_tag(path: &Path, tag: &str) -> Result<bool> {
    if list_tags(path)?.iter().any(|t| t == tag) {
        return Ok(false);
    }
    git_ok(path, &["tag", tag])?;
    Ok(true)
}

/// Pushes the current branch (and optionally all tags) to the selected remote.
pub fn push(path: &Path, include_tags: bool) -> Result<(String, String)> {
    let (remote, branch) = select_remote(path)?;
    git_ok(path, &["push", &remote, &branch])?;
    if include_tags {
        git_ok(path, &["push", &remote, "--tags"])?;
    }
    Ok((remote, branch))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use std::process::Command;

    use serial_test::serial;
    use tempfile::tempdir;

    fn run(dir: &Path, args: &[&str]) {
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
    }

    fn init_git_repo(dir: &Path) {
        run(dir, &["init", "-q"]);
        run(dir, &["checkout", "-q", "-b", "main"]);
        run(dir, &["config", "user.email", "test@example.com"]);
        run(dir, &["config", "user.name", "Test User"]);
        run(dir, &["config", "commit.gpgsign", "false"]);
        run(dir, &["config", "tag.gpgsign", "false"]);
    }

    fn make_commit(dir: &Path, msg: &str) {
        run(dir, &["commit", "-q", "--allow-empty", "-m", msg]);
    }

    fn bare_remote(root: &Path) -> PathBuf {
        let remote = root.join("remote.git");
        fs::create_dir_all(&remote).expect("mkdir");
        run(&remote, &["init", "-q", "--bare"]);
        remote
    }

    #[test]
    #[serial]
    fn detects_repositories() {
        let td = tempdir().expect("tempdir");
        assert!(!is_git_repo(td.path()));
        init_git_repo(td.path());
        assert!(is_git_repo(td.path()));
    }

    #[test]
    #[serial]
    fn clean_and_dirty_working_tree() {
        let td = tempdir().expect("tempdir");
        init_git_repo(td.path());
        make_commit(td.path(), "init");
        assert!(is_git_clean(td.path()).expect("status"));

        fs::write(td.path().join("new.txt"), "x").expect("write");
        assert!(!is_git_clean(td.path()).expect("status"));
        assert_eq!(get_changed_files(td.path()).expect("files"), vec!["new.txt"]);
    }

    #[test]
    #[serial]
    fn commit_and_branch() {
        let td = tempdir().expect("tempdir");
        init_git_repo(td.path());
        assert_eq!(get_commit_hash(td.path()).expect("hash"), None);
        assert_eq!(get_branch(td.path()).expect("branch").as_deref(), Some("main"));

        make_commit(td.path(), "init");
        let hash = get_commit_hash(td.path()).expect("hash").expect("some");
        assert_eq!(hash.len(), 40);
        assert_eq!(get_branch(td.path()).expect("branch").as_deref(), Some("main"));
    }

    #[test]
    fn main_branch_names() {
        assert!(is_main_branch("main"));
        assert!(is_main_branch("master"));
        assert!(!is_main_branch("feature/x"));
    }

    #[test]
    #[serial]
    fn tags_are_not_recreated() {
        let td = tempdir().expect("tempdir");
        init_git_repo(td.path());
        make_commit(td.path(), "init");

        assert!(create_tag(td.path(), "v1.0.0").expect("tag"));
        assert!(!create_tag(td.path(), "v1.0.0").expect("tag again"));
        assert_eq!(list_tags(td.path()).expect("tags"), vec!["v1.0.0"]);
    }

    #[test]
    #[serial]
    fn remote_selection() {
        let td = tempdir().expect("tempdir");
        init_git_repo(td.path());
        make_commit(td.path(), "init");

        let err = select_remote(td.path()).unwrap_err();
        assert_eq!(err.to_string(), "No remotes defined for git repository.");

        run(td.path(), &["remote", "add", "upstream", "https://example.com/a.git"]);
        assert_eq!(
            select_remote(td.path()).expect("single"),
            ("upstream".to_string(), "main".to_string())
        );

        run(td.path(), &["remote", "add", "mirror", "https://example.com/b.git"]);
        assert!(select_remote(td.path()).is_err());

        run(td.path(), &["remote", "add", "hub", "git@github.com:acme/users.git"]);
        assert_eq!(select_remote(td.path()).expect("forge").0, "hub");

        run(td.path(), &["remote", "add", "origin", "https://example.com/c.git"]);
        assert_eq!(select_remote(td.path()).expect("origin").0, "origin");
    }

    #[test]
    #[serial]
    fn checkout_info_reports_relative_path() {
        let td = tempdir().expect("tempdir");
        init_git_repo(td.path());
        make_commit(td.path(), "init");
        run(td.path(), &["remote", "add", "origin", "https://example.com/acme.git"]);

        let sub = td.path().join("blocks/users");
        fs::create_dir_all(&sub).expect("mkdir");

        let info = checkout_info(&sub).expect("info");
        assert_eq!(
            info,
            CheckoutInfo {
                url: "https://example.com/acme.git".into(),
                remote: "origin".into(),
                branch: "main".into(),
                path: "./blocks/users".into(),
            }
        );
        assert_eq!(checkout_info(td.path()).expect("root").path, ".");

        let json = serde_json::to_value(&info).expect("json");
        assert_eq!(json["path"], "./blocks/users");
    }

    #[test]
    #[serial]
    fn push_branch_and_tags_then_detect_behind() {
        let td = tempdir().expect("tempdir");
        let remote = bare_remote(td.path());
        let work = td.path().join("work");
        fs::create_dir_all(&work).expect("mkdir");
        init_git_repo(&work);
        make_commit(&work, "init");
        run(&work, &["remote", "add", "origin", remote.to_str().expect("utf8")]);
        create_tag(&work, "v1.0.0").expect("tag");

        assert_eq!(
            push(&work, true).expect("push"),
            ("origin".to_string(), "main".to_string())
        );
        assert_eq!(list_tags(&remote).expect("remote tags"), vec!["v1.0.0"]);

        let clone = td.path().join("clone");
        run(
            td.path(),
            &["clone", "-q", "-b", "main", remote.to_str().expect("utf8"), "clone"],
        );
        assert_eq!(
            tracking_remote(&clone).expect("tracking"),
            Some(("origin".to_string(), "main".to_string()))
        );
        assert!(is_up_to_date(&clone).expect("up to date"));

        make_commit(&work, "second");
        push(&work, false).expect("push again");

        update_remotes(&clone).expect("update");
        assert_eq!(commits_behind(&clone).expect("behind"), 1);
        assert!(!is_up_to_date(&clone).expect("stale"));
    }

    #[test]
    #[serial]
    fn git_bin_override_is_used() {
        let td = tempdir().expect("tempdir");
        temp_env::with_var("BLOCKSHIP_GIT_BIN", Some("definitely-not-git-xyz"), || {
            assert_eq!(git_program(), "definitely-not-git-xyz");
            assert!(!is_git_repo(td.path()));
            assert!(is_git_clean(td.path()).is_err());
        });
    }
}
