//! Scan cursor.

use serde::{Deserialize, Serialize};

/// Heights dropped when a fork is detected: the forked tip plus one more as a
/// margin against single-block ambiguity.
pub const ROLLBACK_DEPTH: u64 = 2;

/// The scanner's current position in the chain.
///
/// Loaded from the checkpoint at the start of a pass; every advance and
/// rollback is mirrored into the checkpoint store by the scanner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanCursor {
    /// Last processed height.
    pub height: u64,
    /// Hash of the block at `height`.
    pub hash: String,
}

impl ScanCursor {
    pub fn new(height: u64, hash: impl Into<String>) -> Self {
        Self {
            height,
            hash: hash.into(),
        }
    }

    /// The next height to fetch.
    pub fn next_height(&self) -> u64 {
        self.height + 1
    }

    /// Move forward to a newly processed block.
    pub fn advance(&mut self, height: u64, hash: impl Into<String>) {
        self.height = height;
        self.hash = hash.into();
    }

    /// Returns `true` if a block claiming `parent_hash` extends the cursor.
    pub fn is_parent_of(&self, parent_hash: &str) -> bool {
        self.hash == parent_hash
    }

    /// Move back to a rollback target.
    pub fn rollback(&mut self, height: u64, hash: impl Into<String>) {
        self.height = height;
        self.hash = hash.into();
    }
}

/// Rollback target for a fork detected while fetching `fetched_height`.
///
/// Never below height 1.
pub fn rollback_height(fetched_height: u64) -> u64 {
    fetched_height.saturating_sub(ROLLBACK_DEPTH).max(1)
}
