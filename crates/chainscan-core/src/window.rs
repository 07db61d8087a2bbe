//! Recent-block window: a bounded set of block headers kept for rollback
//! lookups after a fork.

use std::collections::BTreeMap;

use crate::types::BlockHeader;

/// Keeps the headers of the last `window_size` heights.
///
/// Saving a header at height `h` evicts everything at or below
/// `h - window_size`, so the window always covers the deepest rollback the
/// scan loop can perform.
#[derive(Debug, Clone)]
pub struct RecentBlocks {
    blocks: BTreeMap<u64, BlockHeader>,
    window_size: u64,
}

impl RecentBlocks {
    /// Create a window covering `window_size` heights (minimum 1).
    pub fn new(window_size: u64) -> Self {
        Self {
            blocks: BTreeMap::new(),
            window_size: window_size.max(1),
        }
    }

    /// Insert or overwrite the header at its height, then evict stale heights.
    pub fn insert(&mut self, header: BlockHeader) {
        let height = header.height;
        self.blocks.insert(height, header);
        if let Some(newest) = self.blocks.keys().next_back().copied() {
            let floor = newest.saturating_sub(self.window_size);
            if floor > 0 {
                self.blocks = self.blocks.split_off(&(floor + 1));
            }
        }
    }

    pub fn get(&self, height: u64) -> Option<&BlockHeader> {
        self.blocks.get(&height)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}
