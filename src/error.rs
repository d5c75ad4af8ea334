use std::path::PathBuf;

use thiserror::Error;

/// Failure of a single File Store operation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt record {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("note '{0}' not found")]
    NotFound(String),

    #[error("invalid note id '{0}'")]
    InvalidId(String),

    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

/// Outcome of a bulk save where at least one note failed to persist.
/// Every note is attempted; `saved` lists the ids that did make it to disk.
#[derive(Debug, Error)]
#[error("{} of {} notes failed to save", failed.len(), failed.len() + saved.len())]
pub struct BulkSaveError {
    pub saved: Vec<String>,
    pub failed: Vec<(String, StoreError)>,
}

impl BulkSaveError {
    pub fn failed_ids(&self) -> Vec<&str> {
        self.failed.iter().map(|(id, _)| id.as_str()).collect()
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("note '{0}' is not loaded in this window")]
    UnknownNote(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Bulk(#[from] BulkSaveError),
}
