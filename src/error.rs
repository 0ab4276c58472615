use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O failed for `{key}`: {source}")]
    Io {
        key: String,
        #[source]
        source: io::Error,
    },
    #[error("record `{key}` could not be encoded: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    pub fn io(key: &str, source: io::Error) -> Self {
        StoreError::Io {
            key: key.to_string(),
            source,
        }
    }
}

/// Reasons a persisted checkpoint cannot be trusted. Every variant leads to a
/// cold start; none of them is surfaced to the user.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("no checkpoint has been written yet")]
    Missing,
    #[error("checkpoint is malformed: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("checkpoint remaining seconds {0} outside 1..=900")]
    OutOfRange(u32),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error, PartialEq)]
pub enum LedgerError {
    #[error("amount must be a positive number, got {0}")]
    InvalidAmount(f64),
    #[error("insufficient balance: need {needed:.2}, available {available:.2}")]
    InsufficientFunds { needed: f64, available: f64 },
}
