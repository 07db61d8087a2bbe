//! Scanner configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Worker limit of the extraction pipeline.
pub const DEFAULT_MAX_EXTRACTING: usize = 10;
/// Heights kept in the recent-block window.
pub const DEFAULT_BLOCK_WINDOW: u64 = 128;

/// Configuration for a [`BlockScanner`](crate::scanner::BlockScanner).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Asset symbol; also namespaces persisted state.
    pub symbol: String,
    /// Decimal places of the asset amount.
    pub decimals: u32,
    /// Heights below the final height re-scanned after every pass.
    pub rescan_last_block_count: u64,
    /// Maximum concurrently running extraction tasks.
    pub max_extracting: usize,
    /// Heights kept in the recent-block window. Must cover the rollback depth.
    pub block_window: u64,
    /// Consecutive fetch failures at one height before a pass gives up.
    pub max_fetch_failures: u32,
    /// Delay between passes when driven by [`BlockScanner::run`](crate::scanner::BlockScanner::run).
    pub scan_interval_ms: u64,
}

impl ScanConfig {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            symbol: "MAT".into(),
            decimals: 8,
            rescan_last_block_count: 0,
            max_extracting: DEFAULT_MAX_EXTRACTING,
            block_window: DEFAULT_BLOCK_WINDOW,
            max_fetch_failures: 3,
            scan_interval_ms: 10_000,
        }
    }
}
