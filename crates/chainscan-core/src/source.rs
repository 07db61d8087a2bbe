//! The remote chain the scanner reads from.

use async_trait::async_trait;

use crate::error::ScanError;
use crate::types::{Block, Transaction};

/// Read access to a remote node.
///
/// Every error is treated as transient by the scan loop: it is logged,
/// recorded in the unscan ledger where a height is involved, and retried on a
/// later pass.
#[async_trait]
pub trait ChainSource: Send + Sync {
    /// The height of the remote chain tip.
    async fn current_height(&self) -> Result<u64, ScanError>;

    /// The block at `height` with its full transaction list.
    async fn block_at(&self, height: u64) -> Result<Block, ScanError>;

    /// A single transaction by id.
    async fn transaction_by_id(&self, tx_id: &str) -> Result<Transaction, ScanError>;

    /// Confirmed balance of `address` as a decimal string.
    async fn balance_of(&self, address: &str) -> Result<String, ScanError>;
}
