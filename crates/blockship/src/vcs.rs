//! Version control seam. Git is the only variant today.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use blockship_types::Repository;
use serde_json::Value;

pub trait VcsHandler {
    fn name(&self) -> &'static str;

    /// Stored as `Repository.type`.
    fn vcs_type(&self) -> &'static str;

    /// No uncommitted or untracked changes.
    fn is_clean(&self) -> Result<bool>;

    /// Not behind the remote tracking branch (after refreshing remotes).
    fn is_up_to_date(&self) -> Result<bool>;

    /// Commit, branch and checkout details for the version registration.
    fn snapshot(&self) -> Result<Repository>;

    /// Creates `tag` unless it exists. `false` when it already did.
    fn tag(&self, tag: &str) -> Result<bool>;

    /// Pushes the current branch, and tags when asked.
    fn push(&self, include_tags: bool) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VcsKind {
    Git,
}

impl VcsKind {
    pub const ALL: [VcsKind; 1] = [VcsKind::Git];

    pub fn is_supported(self, directory: &Path) -> bool {
        match self {
            VcsKind::Git => blockship_git::is_git_repo(directory),
        }
    }

    pub fn create(self, directory: &Path) -> Box<dyn VcsHandler> {
        match self {
            VcsKind::Git => Box::new(GitHandler::new(directory)),
        }
    }
}

pub struct GitHandler {
    directory: PathBuf,
}

impl GitHandler {
    pub fn new(directory: &Path) -> Self {
        Self {
            directory: directory.to_path_buf(),
        }
    }
}

impl VcsHandler for GitHandler {
    fn name(&self) -> &'static str {
        "Git"
    }

    fn vcs_type(&self) -> &'static str {
        "git"
    }

    fn is_clean(&self) -> Result<bool> {
        blockship_git::is_git_clean(&self.directory)
    }

    fn is_up_to_date(&self) -> Result<bool> {
        blockship_git::update_remotes(&self.directory).context("failed to update git remotes")?;
        blockship_git::is_up_to_date(&self.directory)
    }

    fn snapshot(&self) -> Result<Repository> {
        let commit = blockship_git::get_commit_hash(&self.directory)?;
        let branch = blockship_git::get_branch(&self.directory)?;
        // Without a usable remote the checkout details are simply left out.
        let details = match blockship_git::checkout_info(&self.directory) {
            Ok(info) => serde_json::to_value(info)?,
            Err(_) => Value::Null,
        };
        Ok(Repository {
            kind: self.vcs_type().to_string(),
            main: branch.as_deref().is_some_and(blockship_git::is_main_branch),
            commit,
            branch,
            details,
        })
    }

    fn tag(&self, tag: &str) -> Result<bool> {
        blockship_git::create_tag(&self.directory, tag)
    }

    fn push(&self, include_tags: bool) -> Result<()> {
        blockship_git::push(&self.directory, include_tags)?;
        Ok(())
    }
}
