//! Local dependency references (`handle/name:local`) and where their sources live.
//!
//! A definition may refer to another asset at the `local` version, meaning
//! "whatever this run publishes from source". References are found anywhere
//! in the definition's `spec` tree; the sources are looked up in sibling
//! directories of the referring asset and then in the local repository.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::Result;
use blockship_config::Config;
use blockship_types::{AssetDefinition, AssetReference, LOCAL_VERSION};
use serde_json::Value;
use walkdir::WalkDir;

use crate::definition::{find_definition_file, load_definitions};
use crate::error::PublishError;

/// Every distinct `local` reference in the definition's spec, in order of
/// first appearance.
pub fn local_references(definition: &AssetDefinition) -> Vec<AssetReference> {
    let mut found = Vec::new();
    let mut seen = BTreeSet::new();
    visit_strings(&definition.spec, &mut |text| {
        if let Some(reference) = parse_local(text)
            && seen.insert(reference.full_name().to_lowercase())
        {
            found.push(reference);
        }
    });
    found
}

/// Rewrites `local` references whose `handle/name` is in `versions`
/// (keys lower-cased) to the mapped version. Returns how many were replaced.
pub fn replace_references(
    definition: &mut AssetDefinition,
    versions: &BTreeMap<String, String>,
) -> usize {
    let mut replaced = 0;
    visit_strings_mut(&mut definition.spec, &mut |text| {
        let Some(reference) = parse_local(text) else {
            return;
        };
        let Some(version) = versions.get(&reference.full_name().to_lowercase()) else {
            return;
        };
        let prefix = match text.find("://") {
            Some(index) => text[..index + 3].to_string(),
            None => String::new(),
        };
        *text = format!("{prefix}{}", reference.with_version(version.as_str()));
        replaced += 1;
    });
    replaced
}

fn parse_local(text: &str) -> Option<AssetReference> {
    AssetReference::parse_versioned(text).filter(AssetReference::is_local)
}

fn visit_strings(value: &Value, f: &mut dyn FnMut(&str)) {
    match value {
        Value::String(text) => f(text),
        Value::Array(items) => items.iter().for_each(|item| visit_strings(item, f)),
        Value::Object(fields) => fields.values().for_each(|item| visit_strings(item, f)),
        _ => {}
    }
}

fn visit_strings_mut(value: &mut Value, f: &mut dyn FnMut(&mut String)) {
    match value {
        Value::String(text) => f(text),
        Value::Array(items) => items.iter_mut().for_each(|item| visit_strings_mut(item, f)),
        Value::Object(fields) => fields
            .values_mut()
            .for_each(|item| visit_strings_mut(item, f)),
        _ => {}
    }
}

/// Definition file declaring `full_name`: first among the sibling
/// directories of `origin_dir`, then at `<repository>/<handle>/<name>/local`.
pub fn find_local_source(full_name: &str, origin_dir: &Path, config: &Config) -> Option<PathBuf> {
    if let Some(parent) = origin_dir.parent() {
        let siblings = WalkDir::new(parent)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_dir() && entry.path() != origin_dir);
        for entry in siblings {
            if let Some(file) = declaring_file(entry.path(), full_name) {
                return Some(file);
            }
        }
    }

    let reference: AssetReference = full_name.parse().ok()?;
    let installed = config.repository_path(&reference.handle, &reference.name, LOCAL_VERSION);
    declaring_file(&installed, full_name)
}

fn declaring_file(dir: &Path, full_name: &str) -> Option<PathBuf> {
    let file = find_definition_file(dir)?;
    let definitions = load_definitions(&file).ok()?;
    definitions
        .iter()
        .any(|d| d.name().is_some_and(|n| n.eq_ignore_ascii_case(full_name)))
        .then_some(file)
}

/// Publishing order for the assets of one file: every asset comes after the
/// assets of the same file it references at `local`.
pub fn same_file_order(definitions: &[AssetDefinition]) -> Result<Vec<usize>> {
    let index: BTreeMap<String, usize> = definitions
        .iter()
        .enumerate()
        .filter_map(|(i, d)| d.name().map(|n| (n.to_lowercase(), i)))
        .collect();
    let edges: Vec<Vec<usize>> = definitions
        .iter()
        .enumerate()
        .map(|(i, d)| {
            local_references(d)
                .iter()
                .filter_map(|r| index.get(&r.full_name().to_lowercase()).copied())
                .filter(|&j| j != i)
                .collect()
        })
        .collect();

    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        New,
        Visiting,
        Done,
    }

    fn visit(
        node: usize,
        edges: &[Vec<usize>],
        marks: &mut [Mark],
        stack: &mut Vec<usize>,
        order: &mut Vec<usize>,
        definitions: &[AssetDefinition],
    ) -> Result<()> {
        match marks[node] {
            Mark::Done => return Ok(()),
            Mark::Visiting => {
                let start = stack.iter().position(|&n| n == node).unwrap_or(0);
                let chain = stack[start..]
                    .iter()
                    .chain(std::iter::once(&node))
                    .map(|&n| definitions[n].name().unwrap_or_default().to_string())
                    .collect();
                return Err(PublishError::DependencyCycle(chain).into());
            }
            Mark::New => {}
        }
        marks[node] = Mark::Visiting;
        stack.push(node);
        for &next in &edges[node] {
            visit(next, edges, marks, stack, order, definitions)?;
        }
        stack.pop();
        marks[node] = Mark::Done;
        order.push(node);
        Ok(())
    }

    let mut marks = vec![Mark::New; definitions.len()];
    let mut order = Vec::with_capacity(definitions.len());
    for node in 0..definitions.len() {
        visit(node, &edges, &mut marks, &mut Vec::new(), &mut order, definitions)?;
    }
    Ok(order)
}
