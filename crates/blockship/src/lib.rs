//! # Blockship
//!
//! A publishing client for a versioned block registry.
//!
//! Blockship takes a locally authored asset (a block definition plus its build
//! artifact: a Docker image, an NPM package, a Maven package or the bare
//! definition), works out which semantic version it must become, builds and
//! tests it, reserves that version on the registry and only commits the
//! reservation once the artifact has been pushed.
//!
//! ## Pipeline
//!
//! The core flow is **verify → resolve → build → version → reserve → push → commit**:
//!
//! 1. The definition file is loaded and the working tree checked against
//!    its remote (when under version control).
//! 2. `local` references to other assets are published first, recursively,
//!    and replaced with the versions they received.
//! 3. The artifact handler selected for the directory builds, tests and
//!    checksums the asset.
//! 4. The version strategy compares the definition with what is registered
//!    (see [`semver`]) and picks the version to reserve.
//! 5. Each reserved version is pushed and the reservation committed. Any
//!    failure after reserving aborts the reservation instead.
//! 6. Commits on the main branch are tagged and pushed.
//!
//! ## Example
//!
//! ```ignore
//! use std::path::Path;
//! use blockship::{HandlerRegistry, PublishOptions, PublishPipeline, SilentReporter};
//! use blockship::{auth::EnvTokenProvider, config::load_config, registry::RegistryClient};
//!
//! let config = load_config()?;
//! let registry = RegistryClient::new(&config.registry_url(), Box::new(EnvTokenProvider))?;
//! let handlers = HandlerRegistry::new(config);
//! let pipeline = PublishPipeline::new(&registry, &handlers, PublishOptions::default());
//! let outcome = pipeline.push(Path::new("blockship.yml"), &mut SilentReporter)?;
//! ```
//!
//! ## Modules
//!
//! - [`pipeline`]: The publish pipeline and its options
//! - [`handlers`]: Docker, NPM, Maven and YAML artifact handlers
//! - [`vcs`]: Version control seam (Git)
//! - [`dependencies`]: `local` reference discovery and source lookup
//! - [`pull`]: Pulling registered artifacts and installing local sources
//! - [`definition`]: Definition file discovery and multi-document parsing
//! - [`checksum`]: Content hashing with ignore rules
//! - [`error`]: Failure kinds callers can match on

/// Credentials for the registry.
/// Re-exported from blockship-auth microcrate.
pub use blockship_auth as auth;

/// Content hashing with ignore rules.
pub mod checksum;

/// Configuration file loading and merging.
/// Re-exported from blockship-config microcrate.
pub use blockship_config as config;

/// Definition file discovery and multi-document parsing.
pub mod definition;

/// `local` reference discovery and source lookup.
pub mod dependencies;

/// Failure kinds callers can match on.
pub mod error;

/// Append-only JSONL event log.
/// Re-exported from blockship-events microcrate.
pub use blockship_events as events;

/// Backups and copies of working files.
pub mod files;

/// Docker, NPM, Maven and YAML artifact handlers.
pub mod handlers;

/// The publish pipeline.
pub mod pipeline;

/// Pulling registered artifacts and installing local sources.
pub mod pull;

/// Registry API and HTTP client.
/// Re-exported from blockship-registry microcrate.
pub use blockship_registry as registry;

/// Progress reporting sink.
pub mod reporter;

/// Version arithmetic and definition diffing.
/// Re-exported from blockship-semver microcrate.
pub use blockship_semver as semver;

/// Domain types shared with the registry.
/// Re-exported from blockship-types microcrate.
pub use blockship_types as types;

/// Version control seam.
pub mod vcs;

pub use error::PublishError;
pub use handlers::{ArtifactHandler, ArtifactKind, HandlerRegistry};
pub use pipeline::{PublishContext, PublishOptions, PublishOutcome, PublishPipeline};
pub use reporter::{Reporter, SilentReporter};

#[cfg(test)]
mod test_support;
