//! Fetching registered assets and installing local sources.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use blockship_registry::RegistryApi;
use blockship_types::{AssetReference, AssetVersion, LOCAL_VERSION};

use crate::definition::load_definitions;
use crate::handlers::HandlerRegistry;
use crate::reporter::{Reporter, progress};

/// Pulls the artifact registered for `uri` (`handle/name[:version]`,
/// defaulting to the current version) into `target`.
pub fn pull(
    uri: &str,
    target: &Path,
    registry: &dyn RegistryApi,
    handlers: &HandlerRegistry,
    reporter: &mut dyn Reporter,
) -> Result<AssetVersion> {
    let reference: AssetReference = uri.parse()?;
    let registration = registry
        .get_version(&reference.full_name(), &reference.version)?
        .ok_or_else(|| anyhow!("Registration not found: {uri}"))?;
    let artifact = registration
        .artifact
        .as_ref()
        .filter(|a| !a.kind.trim().is_empty())
        .ok_or_else(|| anyhow!("Registration is missing artifact information: {uri}"))?;

    let handler = handlers.artifact_handler_for_type(&artifact.kind, target)?;
    progress(reporter, &format!("Pulling {reference}"), |r| {
        handler.pull(artifact, target, registry, r)
    })?;
    Ok(registration)
}

/// Copies every asset declared in `file` into the local repository at the
/// `local` version, where dependency resolution looks for them. Returns the
/// install directories.
pub fn install_local(
    file: &Path,
    handlers: &HandlerRegistry,
    reporter: &mut dyn Reporter,
) -> Result<Vec<PathBuf>> {
    let source = file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let handler = handlers.artifact_handler_for_directory(source)?;

    let mut installed = Vec::new();
    for definition in load_definitions(file)? {
        let (handle, name) = definition.handle_and_name()?;
        let target = handlers
            .config()
            .repository_path(handle, name, LOCAL_VERSION);
        progress(
            reporter,
            &format!("Installing {handle}/{name}:{LOCAL_VERSION}"),
            |_| {
                handler
                    .install(source, &target)
                    .with_context(|| format!("failed to install into {}", target.display()))
            },
        )?;
        installed.push(target);
    }
    Ok(installed)
}
