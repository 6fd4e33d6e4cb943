use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlagError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Expected column '{column}' not found in the data")]
    MissingColumn { column: String },

    #[error("Invalid date '{value}': expected YYYY-MM-DD")]
    InvalidDate { value: String },

    #[error("Invalid record at line {line}: {reason}")]
    InvalidRecord { line: u64, reason: String },

    #[error("Identifier '{id}' appears more than once in the {product} fragment")]
    DuplicateIdentifier { product: String, id: String },

    #[error("Worker transport for product '{product}' failed: {reason}")]
    Transport { product: String, reason: String },

    #[error("Base product '{product}' has no result; nothing to merge onto")]
    MergeBaseUnavailable { product: String },

    #[error("Flag store {location} is corrupt: {reason}")]
    StoreCorrupt { location: String, reason: String },

    #[error("Timed out after {waited_ms}ms waiting for the lock on {location}")]
    LockTimeout { location: String, waited_ms: u128 },

    #[error("Invalid product tag '{tag}'")]
    InvalidProduct { tag: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type FlagResult<T> = Result<T, FlagError>;

/// Coarse classification of a worker-level failure, carried in run reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InputSchema,
    Parse,
    Transport,
    Store,
}

impl FlagError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::MissingColumn { .. } | Self::InvalidProduct { .. } => FailureKind::InputSchema,
            Self::Csv(_)
            | Self::InvalidDate { .. }
            | Self::InvalidRecord { .. }
            | Self::DuplicateIdentifier { .. }
            | Self::Serialization(_) => FailureKind::Parse,
            Self::Io(_) | Self::Transport { .. } | Self::Other(_) | Self::Config(_) => {
                FailureKind::Transport
            }
            Self::Database(_)
            | Self::StoreCorrupt { .. }
            | Self::LockTimeout { .. }
            | Self::MergeBaseUnavailable { .. } => FailureKind::Store,
        }
    }
}
