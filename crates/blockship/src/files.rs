//! File helpers shared by the artifact handlers.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use walkdir::WalkDir;

use crate::checksum::{IgnoreRules, list_files};

/// Holds the original bytes of a file that is about to be rewritten and puts
/// them back when dropped, on success and failure alike.
#[derive(Debug)]
pub struct FileBackup {
    path: PathBuf,
    original: Vec<u8>,
    restored: bool,
}

impl FileBackup {
    pub fn new(path: &Path) -> Result<Self> {
        let original =
            fs::read(path).with_context(|| format!("failed to back up {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            original,
            restored: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn original(&self) -> &[u8] {
        &self.original
    }

    /// Restores now, surfacing any write error.
    pub fn restore(mut self) -> Result<()> {
        self.restored = true;
        fs::write(&self.path, &self.original)
            .with_context(|| format!("failed to restore {}", self.path.display()))
    }
}

impl Drop for FileBackup {
    fn drop(&mut self) {
        if !self.restored {
            let _ = fs::write(&self.path, &self.original);
        }
    }
}

/// Copies every non-ignored file under `source` into `target`.
pub fn copy_tree(source: &Path, target: &Path, rules: &IgnoreRules) -> Result<usize> {
    let files = list_files(source, rules)?;
    for relative in &files {
        copy_file(&source.join(relative), &target.join(relative))?;
    }
    Ok(files.len())
}

/// Copies the named files of `source` that exist into `target`.
pub fn copy_named(source: &Path, target: &Path, names: &[&str]) -> Result<usize> {
    let mut copied = 0;
    for name in names {
        let from = source.join(name);
        if from.is_file() {
            copy_file(&from, &target.join(name))?;
            copied += 1;
        }
    }
    Ok(copied)
}

fn copy_file(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::copy(from, to)
        .with_context(|| format!("failed to copy {} to {}", from.display(), to.display()))?;
    Ok(())
}

/// Files with the given extension directly under `dir`.
pub fn files_with_extension(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry.with_context(|| format!("failed to list {}", dir.display()))?;
        let path = entry.path();
        if entry.file_type().is_file() && path.extension().is_some_and(|e| e == extension) {
            found.push(path.to_path_buf());
        }
    }
    Ok(found)
}
