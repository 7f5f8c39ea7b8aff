//! Error types for IAM sync operations

use std::path::PathBuf;
use thiserror::Error;

use crate::provider::ApiError;

/// Errors that can occur while exporting or converging IAM state
#[derive(Debug, Error)]
pub enum IamSyncError {
    /// Configuration is missing or invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// Credential file is missing or malformed
    #[error("Credentials error: {0}")]
    Credentials(String),

    /// Reading or writing a state file failed
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A state file or document is not valid JSON for its kind
    #[error("Invalid JSON in {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    /// Reconciliation was requested before the target account was captured
    #[error("IAM details for the target account have not been loaded")]
    SnapshotNotLoaded,

    /// Control-plane call failed outside of a per-entity batch
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Operator declined an interactive confirmation
    #[error("Aborted: {0}")]
    Aborted(String),
}

impl IamSyncError {
    pub(crate) fn json(context: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Json {
            context: context.into(),
            source,
        }
    }
}

pub type Result<T, E = IamSyncError> = std::result::Result<T, E>;
