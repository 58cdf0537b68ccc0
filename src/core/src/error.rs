//! Error handling for jobq-core.
//!
//! Two kinds of outcomes matter here and they are kept distinct on purpose:
//!
//! - **Storage faults** (I/O, serialization) are `Err(JobqError)`. Callers
//!   must treat them as "no state changed".
//! - **Expected negative outcomes** (a lock already held by another worker,
//!   a DLQ retry of a job that is not Dead) are `Ok(false)`, never errors.

use std::path::PathBuf;

use thiserror::Error;

/// A specialized Result type for jobq operations.
pub type Result<T> = std::result::Result<T, JobqError>;

/// Errors produced by the job store, orchestrator, and configuration layer.
#[derive(Debug, Error)]
pub enum JobqError {
    /// An I/O failure while reading or replacing a store document.
    #[error("storage I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A document could not be serialized or deserialized.
    #[error("document serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A configuration key outside the recognized set.
    #[error("unknown configuration key: {0}")]
    UnknownConfigKey(String),

    /// A configuration value that does not parse for its key's type.
    #[error("invalid value {value:?} for configuration key {key}")]
    InvalidConfigValue { key: String, value: String },
}

impl JobqError {
    /// Wrap an I/O error with the document path it occurred on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

}
