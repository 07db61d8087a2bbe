//! Retry sweeper for heights recorded in the unscan ledger.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::checkpoint::ScanStore;
use crate::extract::AddressMatcher;
use crate::pipeline::ExtractionPipeline;
use crate::source::ChainSource;

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Heights found in the ledger and retried.
    pub attempted: usize,
    /// Heights whose records were cleared.
    pub recovered: usize,
    /// Heights left in the ledger for a later sweep.
    pub failed: usize,
}

/// Re-fetches and re-extracts failed heights.
///
/// Sweeps are idempotent: a height either succeeds and has all its records
/// deleted, or keeps them for the next sweep. There is no backoff or cap.
pub struct RetrySweeper {
    source: Arc<dyn ChainSource>,
    store: Arc<dyn ScanStore>,
    pipeline: Arc<ExtractionPipeline>,
}

impl RetrySweeper {
    pub fn new(
        source: Arc<dyn ChainSource>,
        store: Arc<dyn ScanStore>,
        pipeline: Arc<ExtractionPipeline>,
    ) -> Self {
        Self {
            source,
            store,
            pipeline,
        }
    }

    /// Retry every height in the ledger, lowest first. Height 0 is skipped.
    pub async fn sweep(&self, matcher: Arc<dyn AddressMatcher>) -> SweepReport {
        let records = match self.store.unscan_records().await {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "can not load unscan records");
                return SweepReport::default();
            }
        };

        let heights: BTreeSet<u64> = records
            .iter()
            .map(|r| r.block_height)
            .filter(|h| *h != 0)
            .collect();

        let mut report = SweepReport::default();
        for height in heights {
            report.attempted += 1;
            info!(height, "rescanning failed height");

            let block = match self.source.block_at(height).await {
                Ok(block) => block,
                Err(e) => {
                    warn!(height, error = %e, "can not fetch block for rescan");
                    report.failed += 1;
                    continue;
                }
            };

            if !block.transactions.is_empty() {
                if let Err(e) = self
                    .pipeline
                    .batch_extract(height, &block.hash, block.transactions, Arc::clone(&matcher))
                    .await
                {
                    warn!(height, error = %e, "rescan extract failed");
                    report.failed += 1;
                    continue;
                }
            }

            match self.store.delete_unscan_records(height).await {
                Ok(n) => {
                    debug!(height, removed = n, "unscan records cleared");
                    report.recovered += 1;
                }
                Err(e) => {
                    warn!(height, error = %e, "can not delete unscan records");
                    report.failed += 1;
                }
            }
        }
        report
    }
}
