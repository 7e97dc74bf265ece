// src/error.rs

//! Crate-wide error taxonomy.
//!
//! Only schema-level violations surface through this type: a malformed
//! snapshot, an invalid model, a held apply lock. Per-item capture failures
//! travel as [`crate::snapshot::Finding`]s and per-action reconcile failures
//! as [`crate::reconcile::Outcome`]s; neither aborts a run.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that abort a pipeline stage.
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to parse model file: {0}")]
    ModelParse(#[from] toml::de::Error),

    #[error("failed to serialize model file: {0}")]
    ModelSerialize(#[from] toml::ser::Error),

    #[error("unknown capture unit '{0}' in snapshot")]
    UnknownUnit(String),

    #[error("unknown role '{0}'")]
    UnknownRole(String),

    #[error("snapshot at {0} has no manifest.json")]
    MissingManifest(PathBuf),

    #[error("validation failed for role '{role}', field '{field}': {message}")]
    Validation {
        role: String,
        field: String,
        message: String,
    },

    #[error("blob {0} referenced by the model is not present in the blob store")]
    MissingBlob(String),

    #[error("another reconciliation already holds the lock at {0}")]
    LockHeld(PathBuf),

    #[error("invalid content hash: {0}")]
    InvalidHash(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Construct a normalize-time validation error naming the offending role
    /// and field.
    pub fn validation(
        role: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Validation {
            role: role.into(),
            field: field.into(),
            message: message.into(),
        }
    }

    /// True for errors that map to the dedicated validation exit code.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Validation { .. }
                | Self::MissingBlob(_)
                | Self::UnknownUnit(_)
                | Self::UnknownRole(_)
        )
    }
}

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
