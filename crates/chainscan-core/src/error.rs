//! Error types for the block scanner.

use thiserror::Error;

/// Errors that can occur while scanning and extracting blocks.
#[derive(Debug, Clone, Error)]
pub enum ScanError {
    #[error("chain source error: {0}")]
    Source(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("extract transaction '{tx_id}' failed: {reason}")]
    Extraction { tx_id: String, reason: String },

    #[error("observer notify for '{key}' failed: {reason}")]
    Notify { key: String, reason: String },

    #[error("block {height} has no transactions to extract")]
    EmptyBlock { height: u64 },

    #[error("block {height}: {failed} of {total} transactions failed")]
    BatchFailed { height: u64, failed: usize, total: usize },

    #[error("cannot resolve rollback block at height {height}: {reason}")]
    ForkResolution { height: u64, reason: String },

    #[error("block height to rescan must be greater than 0, got {0}")]
    InvalidHeight(u64),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl ScanError {
    /// Returns `true` if the error must abort the current scan pass.
    ///
    /// Everything else is recorded in the unscan ledger and retried later.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ForkResolution { .. })
    }
}
