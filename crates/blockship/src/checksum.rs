//! Content hashing for artifact payloads.
//!
//! A checksum identifies the bytes that would be pushed, independent of the
//! version they end up under, so the registry can spot a no-op republish.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use glob::{MatchOptions, Pattern};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

/// Paths left out of a directory checksum.
#[derive(Debug, Clone, Default)]
pub struct IgnoreRules {
    patterns: Vec<Pattern>,
}

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

impl IgnoreRules {
    /// Always skips the given paths (relative, `/`-separated).
    pub fn new(always: &[&str]) -> Self {
        let mut rules = Self::default();
        for pattern in always {
            rules.add(pattern);
        }
        rules
    }

    /// Adds the patterns of an ignore file (`.dockerignore`, `.npmignore`)
    /// under `root`, if it exists. Negated patterns are not supported and
    /// are skipped.
    pub fn with_ignore_file(mut self, root: &Path, file_name: &str) -> Result<Self> {
        let path = root.join(file_name);
        if !path.is_file() {
            return Ok(self);
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }
            self.add(line);
        }
        Ok(self)
    }

    fn add(&mut self, pattern: &str) {
        let pattern = pattern.trim_start_matches("./").trim_matches('/');
        if pattern.is_empty() {
            return;
        }
        if let Ok(compiled) = Pattern::new(pattern) {
            self.patterns.push(compiled);
        }
    }

    /// True if `relative` (or, checked by the walker, any of its parents) is
    /// ignored.
    pub fn is_ignored(&self, relative: &str) -> bool {
        self.patterns
            .iter()
            .any(|p| p.matches_with(relative, MATCH_OPTIONS))
    }
}

/// SHA-256 of a single file.
pub fn hash_file(path: &Path) -> Result<String> {
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

/// SHA-256 over every non-ignored file under `root`: relative path and
/// contents, in sorted order.
pub fn hash_directory(root: &Path, rules: &IgnoreRules) -> Result<String> {
    let mut hasher = Sha256::new();
    for relative in list_files(root, rules)? {
        let path = root.join(&relative);
        let bytes =
            fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?;
        hasher.update(relative.as_bytes());
        hasher.update([0u8]);
        hasher.update((bytes.len() as u64).to_le_bytes());
        hasher.update(&bytes);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Relative, `/`-separated paths of every non-ignored file under `root`, sorted.
pub fn list_files(root: &Path, rules: &IgnoreRules) -> Result<Vec<String>> {
    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0 || !rules.is_ignored(&relative_path(root, entry.path()))
        });
    for entry in walker {
        let entry = entry.with_context(|| format!("failed to walk {}", root.display()))?;
        if entry.file_type().is_file() {
            files.push(relative_path(root, entry.path()));
        }
    }
    files.sort();
    Ok(files)
}

fn relative_path(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
