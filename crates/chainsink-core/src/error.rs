//! Error types for the persistence adapter.

use thiserror::Error;

/// Errors that can occur while persisting processor batches.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("connect error: {0}")]
    Connect(String),

    #[error("schema error: {0}")]
    Schema(String),

    #[error("transient I/O error: {0}")]
    TransientIo(String),

    #[error("unknown table '{table}': {reason}")]
    UnknownTable { table: String, reason: String },

    #[error("reorg consistency error at height {height}: {reason}")]
    ReorgConsistency { height: u64, reason: String },

    #[error("checkpoint write failed: {0}")]
    CheckpointWrite(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl SinkError {
    /// Returns `true` if the error is a transient transport failure that
    /// insert paths may retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientIo(_))
    }

    /// Returns `true` if the error names a table the database does not have.
    pub fn is_unknown_table(&self) -> bool {
        matches!(self, Self::UnknownTable { .. })
    }
}
