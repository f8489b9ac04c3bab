//! Failure kinds callers may need to tell apart.
//!
//! Everything travels as `anyhow::Error`; use `downcast_ref::<PublishError>()`
//! to branch on a specific kind.

use std::path::PathBuf;

use blockship_semver::IncrementType;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("{} was not found", .0.display())]
    DefinitionNotFound(PathBuf),

    #[error("{} is not a file. A valid file must be specified", .0.display())]
    NotAFile(PathBuf),

    #[error("{} is invalid: {reason}", .path.display())]
    InvalidDefinition { path: PathBuf, reason: String },

    #[error(
        "Working directory is not clean. Make sure everything is committed or use --ignore-working-directory to ignore"
    )]
    DirtyWorkingDirectory,

    #[error(
        "Working directory is not up to date with remote. Pull the latest changes or use --ignore-working-directory to continue."
    )]
    BehindRemote,

    #[error("Artifact type not found: {0}")]
    ArtifactTypeNotFound(String),

    #[error("Build failed: {0}")]
    BuildFailed(String),

    #[error("Tests failed: {0}")]
    TestsFailed(String),

    #[error("Version already existed for checksum: {name}:{version} > {checksum}")]
    VersionAlreadyPublished {
        name: String,
        version: String,
        checksum: String,
    },

    #[error(
        "Version increment not allowed: {version}. {actual} detected and required increment was {required} from {previous}"
    )]
    VersionIncrementNotAllowed {
        name: String,
        version: String,
        previous: String,
        actual: IncrementType,
        required: IncrementType,
    },

    #[error(
        "Existing version {version} of {name} not found. Auto-versioning requires that you do not change the version manually."
    )]
    ManualVersionChange { name: String, version: String },

    #[error("Dependency cycle detected: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    #[error(
        "Local dependency {0} was not found in the same file, in sibling directories or in the local repository"
    )]
    DependencyNotFound(String),

    #[error("Failed to reserve version - no reservation returned from registry")]
    ReservationMissing,
}

#[cfg(test)]
mod tests {
    use super::*;
    use insta::assert_snapshot;

    #[test]
    fn user_facing_messages() {
        assert_snapshot!(
            PublishError::NotAFile(PathBuf::from("blocks/blockship.yml")).to_string(),
            @"blocks/blockship.yml is not a file. A valid file must be specified"
        );
        assert_snapshot!(
            PublishError::VersionIncrementNotAllowed {
                name: "acme/users".into(),
                version: "1.0.1".into(),
                previous: "1.0.0".into(),
                actual: IncrementType::Patch,
                required: IncrementType::Major,
            }
            .to_string(),
            @"Version increment not allowed: 1.0.1. PATCH detected and required increment was MAJOR from 1.0.0"
        );
        assert_snapshot!(
            PublishError::DependencyCycle(vec!["a/blockship.yml".into(), "b/blockship.yml".into(), "a/blockship.yml".into()])
                .to_string(),
            @"Dependency cycle detected: a/blockship.yml -> b/blockship.yml -> a/blockship.yml"
        );
    }

    #[test]
    fn survives_anyhow_round_trip() {
        let err: anyhow::Error = PublishError::ReservationMissing.into();
        assert!(matches!(
            err.downcast_ref::<PublishError>(),
            Some(PublishError::ReservationMissing)
        ));
    }
}
