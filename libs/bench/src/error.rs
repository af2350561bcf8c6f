//! Error taxonomy for benchmark sessions.
//!
//! Public functions return `anyhow::Result`, with a [`BenchError`] as the root
//! cause whenever the failure belongs to one of the categories below. Callers
//! that need to tell them apart use `err.downcast_ref::<BenchError>()`.

use std::path::PathBuf;

use thiserror::Error;

/// Fatal benchmark failures.
#[derive(Debug, Error)]
pub enum BenchError {
    /// Configuration the harness refuses to guess about (unknown distance
    /// family, missing tuning parameters, no backend for a runner).
    #[error("unsupported configuration: {0}")]
    UnsupportedConfig(String),

    /// The index collaborator failed while executing a query batch.
    #[error("query batch failed for runner {runner} on trial {trial}: {reason}")]
    QueryBatch {
        runner: String,
        trial: usize,
        reason: String,
    },

    /// A query batch returned a result that cannot be measured.
    #[error("invalid trial {trial}: {reason}")]
    InvalidTrial { trial: usize, reason: String },

    /// A result table could not be read or written.
    #[error("storage error on {}: {reason}", path.display())]
    Storage { path: PathBuf, reason: String },

    /// Dataset download failed.
    #[error("failed to fetch {url}: {status}")]
    Fetch { url: String, status: String },

    /// A row handed to the result store does not belong to the key it was
    /// upserted under.
    #[error("row for {found} cannot be stored under key {expected}")]
    KeyMismatch { expected: String, found: String },

    /// Dataset file is missing pieces or is malformed.
    #[error("dataset error: {0}")]
    Dataset(String),
}

impl BenchError {
    pub fn unsupported(msg: impl Into<String>) -> Self {
        BenchError::UnsupportedConfig(msg.into())
    }

    pub fn storage(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        BenchError::Storage {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Returns the [`BenchError`] at the root of an `anyhow` chain, if any.
pub fn classify(err: &anyhow::Error) -> Option<&BenchError> {
    err.chain().find_map(|cause| cause.downcast_ref::<BenchError>())
}
