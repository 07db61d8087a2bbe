//! Node transport errors.

use chainscan_core::ScanError;
use thiserror::Error;

/// Errors talking to the node API.
#[derive(Debug, Clone, Error)]
pub enum NodeError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The node answered with a non-zero `errCode`.
    #[error("[{code}]{msg}")]
    Api { code: i64, msg: String },

    #[error("decode error: {0}")]
    Decode(String),

    #[error("{0}")]
    NotFound(String),
}

impl NodeError {
    /// Returns `true` if retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Api { .. } | Self::Decode(_) | Self::NotFound(_) => false,
        }
    }
}

impl From<NodeError> for ScanError {
    fn from(e: NodeError) -> Self {
        match e {
            NodeError::NotFound(what) => ScanError::NotFound(what),
            other => ScanError::Source(other.to_string()),
        }
    }
}
