//! Persists scan progress, the recent-block window and the
//! unscan ledger.
//!
//! The checkpoint is the last successfully processed `(height, hash)`. On
//! restart the scanner resumes from it instead of starting at the remote tip.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::ScanError;
use crate::types::{BlockHeader, ScanCheckpoint, UnscanRecord};
use crate::window::RecentBlocks;

/// Storage backend for a single scanner.
///
/// Implementations include [`MemoryScanStore`] and the SQLite store in
/// `chainscan-storage`. Every call must be durable on return; callers
/// serialize writers, so no multi-call atomicity is required.
#[async_trait]
pub trait ScanStore: Send + Sync {
    /// Load the checkpoint, `None` on a fresh start.
    async fn load_checkpoint(&self) -> Result<Option<ScanCheckpoint>, ScanError>;

    /// Save (overwrite) the checkpoint.
    async fn save_checkpoint(&self, height: u64, hash: &str) -> Result<(), ScanError>;

    /// Record a block header in the recent window, evicting stale heights.
    async fn save_block(&self, header: &BlockHeader) -> Result<(), ScanError>;

    /// Look up a header from the recent window.
    async fn get_block(&self, height: u64) -> Result<Option<BlockHeader>, ScanError>;

    /// Insert or replace an unscan record (keyed by its id).
    async fn save_unscan_record(&self, record: &UnscanRecord) -> Result<(), ScanError>;

    /// All unscan records.
    async fn unscan_records(&self) -> Result<Vec<UnscanRecord>, ScanError>;

    /// Unscan records at one height.
    async fn unscan_records_at(&self, height: u64) -> Result<Vec<UnscanRecord>, ScanError>;

    /// Delete every unscan record at `height`, returning how many were removed.
    async fn delete_unscan_records(&self, height: u64) -> Result<usize, ScanError>;
}

// ─── In-memory store ──────────────────────────────────────────────────────────

struct MemoryState {
    checkpoint: Option<ScanCheckpoint>,
    blocks: RecentBlocks,
    unscan: HashMap<String, UnscanRecord>,
}

/// In-memory scan store for tests and ephemeral scanners.
///
/// All data is lost when the process exits.
pub struct MemoryScanStore {
    state: Mutex<MemoryState>,
}

impl MemoryScanStore {
    pub fn new(block_window: u64) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                checkpoint: None,
                blocks: RecentBlocks::new(block_window),
                unscan: HashMap::new(),
            }),
        }
    }

    /// Number of headers currently held in the recent window.
    pub fn block_count(&self) -> usize {
        self.state.lock().unwrap().blocks.len()
    }
}

impl Default for MemoryScanStore {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_BLOCK_WINDOW)
    }
}

#[async_trait]
impl ScanStore for MemoryScanStore {
    async fn load_checkpoint(&self) -> Result<Option<ScanCheckpoint>, ScanError> {
        Ok(self.state.lock().unwrap().checkpoint.clone())
    }

    async fn save_checkpoint(&self, height: u64, hash: &str) -> Result<(), ScanError> {
        self.state.lock().unwrap().checkpoint = Some(ScanCheckpoint {
            height,
            hash: hash.to_string(),
            updated_at: chrono::Utc::now().timestamp(),
        });
        Ok(())
    }

    async fn save_block(&self, header: &BlockHeader) -> Result<(), ScanError> {
        self.state.lock().unwrap().blocks.insert(header.clone());
        Ok(())
    }

    async fn get_block(&self, height: u64) -> Result<Option<BlockHeader>, ScanError> {
        Ok(self.state.lock().unwrap().blocks.get(height).cloned())
    }

    async fn save_unscan_record(&self, record: &UnscanRecord) -> Result<(), ScanError> {
        self.state
            .lock()
            .unwrap()
            .unscan
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn unscan_records(&self) -> Result<Vec<UnscanRecord>, ScanError> {
        let mut list: Vec<_> = self.state.lock().unwrap().unscan.values().cloned().collect();
        list.sort_by(|a, b| (a.block_height, &a.tx_id).cmp(&(b.block_height, &b.tx_id)));
        Ok(list)
    }

    async fn unscan_records_at(&self, height: u64) -> Result<Vec<UnscanRecord>, ScanError> {
        Ok(self
            .unscan_records()
            .await?
            .into_iter()
            .filter(|r| r.block_height == height)
            .collect())
    }

    async fn delete_unscan_records(&self, height: u64) -> Result<usize, ScanError> {
        let mut state = self.state.lock().unwrap();
        let before = state.unscan.len();
        state.unscan.retain(|_, r| r.block_height != height);
        Ok(before - state.unscan.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(height: u64) -> BlockHeader {
        BlockHeader {
            height,
            hash: format!("h{height}"),
            parent_hash: format!("h{}", height - 1),
            time: 0,
            is_fork: false,
            symbol: "MAT".into(),
        }
    }

    #[tokio::test]
    async fn checkpoint_roundtrip() {
        let store = MemoryScanStore::default();
        assert!(store.load_checkpoint().await.unwrap().is_none());

        store.save_checkpoint(1000, "0xabc").await.unwrap();
        store.save_checkpoint(1001, "0xdef").await.unwrap();

        let cp = store.load_checkpoint().await.unwrap().unwrap();
        assert_eq!(cp.height, 1001);
        assert_eq!(cp.hash, "0xdef");
    }

    #[tokio::test]
    async fn block_window_is_bounded() {
        let store = MemoryScanStore::new(4);
        for h in 1..=20 {
            store.save_block(&header(h)).await.unwrap();
        }
        assert_eq!(store.block_count(), 4);
        assert!(store.get_block(16).await.unwrap().is_none());
        assert_eq!(store.get_block(17).await.unwrap().unwrap().hash, "h17");
    }

    #[tokio::test]
    async fn unscan_records_by_height() {
        let store = MemoryScanStore::default();
        store.save_unscan_record(&UnscanRecord::new(5, "", "fetch")).await.unwrap();
        store.save_unscan_record(&UnscanRecord::new(5, "tx1", "extract")).await.unwrap();
        store.save_unscan_record(&UnscanRecord::new(9, "tx2", "notify")).await.unwrap();
        // Same id replaces.
        store.save_unscan_record(&UnscanRecord::new(5, "tx1", "again")).await.unwrap();

        assert_eq!(store.unscan_records().await.unwrap().len(), 3);
        assert_eq!(store.unscan_records_at(5).await.unwrap().len(), 2);

        assert_eq!(store.delete_unscan_records(5).await.unwrap(), 2);
        let left = store.unscan_records().await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].block_height, 9);
    }
}
