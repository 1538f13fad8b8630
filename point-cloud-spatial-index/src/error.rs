/// Central error type for the sort and build stages.
use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum BuildError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Point source error: {0}")]
    Source(#[from] las::Error),

    #[error("Manifest error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Inconsistent point counts: {what} has {found}, expected {expected}")]
    InconsistentCounts {
        what: String,
        expected: u64,
        found: u64,
    },

    #[error("Point {id} has a non-finite coordinate")]
    InvalidPoint { id: u32 },

    #[error("Malformed file {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },

    #[error("Worker lost: {0}")]
    WorkerLost(String),
}

impl BuildError {
    /// Convenience constructors for common error types
    pub fn config<T: ToString>(msg: T) -> Self {
        BuildError::Config(msg.to_string())
    }

    pub fn malformed<T: ToString>(path: impl Into<PathBuf>, reason: T) -> Self {
        BuildError::Malformed {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn counts(what: impl Into<String>, expected: u64, found: u64) -> Self {
        BuildError::InconsistentCounts {
            what: what.into(),
            expected,
            found,
        }
    }
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, BuildError>;
