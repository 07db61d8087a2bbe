//! The block scanner. Drives scan passes over a chain source.
//!
//! # Scan pass
//! Starting from the checkpoint (or `remote tip - 1` on a fresh start), fetch
//! the next height and compare its parent hash with the cursor:
//!   - Match → extract its transactions, persist the checkpoint and header,
//!     announce the block.
//!   - Mismatch → fork. Drop the discarded tip's unscan records, roll the
//!     cursor back by [`ROLLBACK_DEPTH`](crate::cursor::ROLLBACK_DEPTH),
//!     persist it and announce the discarded tip with `is_fork = true`.
//!
//! The pass ends when it catches up with the remote tip, when scanning is
//! paused, or when the source stops answering. Unless it was paused, it then
//! re-extracts the last `rescan_last_block_count` heights and sweeps the
//! unscan ledger.
//!
//! Passes and every other checkpoint-writing operation are serialized by a
//! single pass lock, so the store only ever sees one writer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::checkpoint::ScanStore;
use crate::config::ScanConfig;
use crate::cursor::{rollback_height, ScanCursor};
use crate::error::ScanError;
use crate::extract::AddressMatcher;
use crate::observer::ObserverRegistry;
use crate::pipeline::{record_unscan, ExtractionPipeline};
use crate::source::ChainSource;
use crate::sweeper::{RetrySweeper, SweepReport};
use crate::types::{AddressBalance, Block, BlockHeader, ExtractBundle, UnscanRecord};

/// Why a scan pass stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassStop {
    /// The cursor reached the remote tip.
    CaughtUp,
    /// Scanning was paused or stopped.
    Paused,
    /// The remote tip height could not be queried.
    HeightUnavailable,
    /// The block at this height kept failing to fetch.
    FetchFailed(u64),
    /// Progress at this height could not be persisted.
    StorageFailed(u64),
}

/// Summary of one scan pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassReport {
    pub start_height: u64,
    pub end_height: u64,
    /// Blocks advanced over linearly.
    pub scanned: u64,
    /// Forks detected (each one a rollback).
    pub forks: u64,
    pub stop: PassStop,
    pub sweep: SweepReport,
}

/// Scans one chain for transfers touching addresses of interest.
pub struct BlockScanner {
    config: ScanConfig,
    source: Arc<dyn ChainSource>,
    store: Arc<dyn ScanStore>,
    observers: Arc<ObserverRegistry>,
    pipeline: Arc<ExtractionPipeline>,
    sweeper: RetrySweeper,
    matcher: Arc<dyn AddressMatcher>,
    scanning: AtomicBool,
    stop: Notify,
    pass_lock: Mutex<()>,
}

impl BlockScanner {
    pub fn new(
        config: ScanConfig,
        source: Arc<dyn ChainSource>,
        store: Arc<dyn ScanStore>,
        observers: Arc<ObserverRegistry>,
        pipeline: Arc<ExtractionPipeline>,
        matcher: Arc<dyn AddressMatcher>,
    ) -> Self {
        let sweeper = RetrySweeper::new(
            Arc::clone(&source),
            Arc::clone(&store),
            Arc::clone(&pipeline),
        );
        Self {
            config,
            source,
            store,
            observers,
            pipeline,
            sweeper,
            matcher,
            scanning: AtomicBool::new(true),
            stop: Notify::new(),
            pass_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn symbol(&self) -> &str {
        &self.config.symbol
    }

    /// The observer registry; observers may be added at any time.
    pub fn observers(&self) -> &Arc<ObserverRegistry> {
        &self.observers
    }

    pub fn store(&self) -> &Arc<dyn ScanStore> {
        &self.store
    }

    // ─── Control ──────────────────────────────────────────────────────────────

    /// Stop the current pass at its next iteration. Progress is kept.
    pub fn pause(&self) {
        self.scanning.store(false, Ordering::SeqCst);
        info!(symbol = %self.config.symbol, "block scanner paused");
    }

    pub fn resume(&self) {
        self.scanning.store(true, Ordering::SeqCst);
        info!(symbol = %self.config.symbol, "block scanner resumed");
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::SeqCst)
    }

    /// Run a scan pass every `interval` until [`stop`](Self::stop) is called.
    ///
    /// Passes are skipped while paused. A failed pass is logged and the loop
    /// carries on.
    pub async fn run(&self, interval: Duration) {
        info!(symbol = %self.config.symbol, ?interval, "block scanner started");
        loop {
            if self.is_scanning() {
                match self.scan_block_task().await {
                    Ok(report) => debug!(?report, "scan pass finished"),
                    Err(e) => error!(error = %e, "scan pass aborted"),
                }
            }
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = self.stop.notified() => break,
            }
        }
        info!(symbol = %self.config.symbol, "block scanner stopped");
    }

    /// End [`run`](Self::run). The pass in flight stops at its next iteration.
    pub fn stop(&self) {
        self.scanning.store(false, Ordering::SeqCst);
        self.stop.notify_one();
    }

    // ─── Scan pass ────────────────────────────────────────────────────────────

    /// Run one scan pass.
    ///
    /// Only a fork that cannot be resolved aborts the pass with an error; the
    /// next pass resumes from the last persisted checkpoint.
    pub async fn scan_block_task(&self) -> Result<PassReport, ScanError> {
        let _pass = self.pass_lock.lock().await;
        let span = info_span!("scan_pass", symbol = %self.config.symbol);
        self.scan_pass().instrument(span).await
    }

    async fn scan_pass(&self) -> Result<PassReport, ScanError> {
        let start = self.resolve_scanned_header().await.map_err(|e| {
            error!(error = %e, "block scanner can not get scanned block");
            e
        })?;
        let mut cursor = ScanCursor::new(start.height, start.hash);
        let mut report = PassReport {
            start_height: cursor.height,
            end_height: cursor.height,
            scanned: 0,
            forks: 0,
            stop: PassStop::CaughtUp,
            sweep: SweepReport::default(),
        };
        let mut fetch_failures = 0u32;

        report.stop = loop {
            if !self.is_scanning() {
                break PassStop::Paused;
            }

            let max_height = match self.source.current_height().await {
                Ok(h) => h,
                Err(e) => {
                    warn!(error = %e, "can not get remote block height");
                    break PassStop::HeightUnavailable;
                }
            };
            if cursor.height >= max_height {
                info!(height = cursor.height, "block scanner has scanned full chain data");
                break PassStop::CaughtUp;
            }

            let next = cursor.next_height();
            let block = match self.source.block_at(next).await {
                Ok(block) => {
                    fetch_failures = 0;
                    block
                }
                Err(e) => {
                    warn!(height = next, error = %e, "can not get block");
                    record_unscan(self.store.as_ref(), UnscanRecord::new(next, "", e.to_string()))
                        .await;
                    fetch_failures += 1;
                    if fetch_failures >= self.config.max_fetch_failures.max(1) {
                        break PassStop::FetchFailed(next);
                    }
                    continue;
                }
            };

            if !cursor.is_parent_of(&block.parent_hash) {
                self.roll_back(&mut cursor, &block).await?;
                report.forks += 1;
                continue;
            }

            let (height, hash) = (block.height, block.hash.clone());
            if let Err(e) = self.advance(block).await {
                error!(height, error = %e, "can not persist scan progress");
                break PassStop::StorageFailed(height);
            }
            cursor.advance(height, hash);
            report.scanned += 1;
        };
        report.end_height = cursor.height;

        if report.stop == PassStop::Paused {
            info!(height = cursor.height, "block scanner paused, pass ends");
            return Ok(report);
        }

        // Re-extract the heights just below the final position.
        let from = cursor.height.saturating_sub(self.config.rescan_last_block_count);
        for height in from..cursor.height {
            if let Err(e) = self.scan_block_at(height).await {
                debug!(height, error = %e, "rescan of recent block failed");
            }
        }

        report.sweep = self.sweeper.sweep(Arc::clone(&self.matcher)).await;
        info!(
            start = report.start_height,
            end = report.end_height,
            scanned = report.scanned,
            forks = report.forks,
            "scan pass complete"
        );
        Ok(report)
    }

    /// Discard the tip at `cursor` after `block` failed to extend it.
    async fn roll_back(&self, cursor: &mut ScanCursor, block: &Block) -> Result<(), ScanError> {
        let tip_height = cursor.height;
        warn!(
            height = block.height,
            local_hash = %cursor.hash,
            parent_hash = %block.parent_hash,
            "block has been forked"
        );

        match self.store.delete_unscan_records(tip_height).await {
            Ok(n) if n > 0 => debug!(height = tip_height, removed = n, "forked unscan records dropped"),
            Ok(_) => {}
            Err(e) => warn!(height = tip_height, error = %e, "can not delete unscan records"),
        }

        let tip = match self.store.get_block(tip_height).await {
            Ok(Some(header)) if header.hash == cursor.hash => header,
            Ok(_) => self.synthesize_header(tip_height, &cursor.hash),
            Err(e) => {
                warn!(height = tip_height, error = %e, "can not load forked block");
                self.synthesize_header(tip_height, &cursor.hash)
            }
        };

        let target = rollback_height(block.height);
        let hash = self.resolve_rollback_hash(target, tip_height).await?;
        self.store
            .save_checkpoint(target, &hash)
            .await
            .map_err(|e| ScanError::ForkResolution {
                height: target,
                reason: e.to_string(),
            })?;
        info!(height = target, hash = %hash, "rescan block on height");
        cursor.rollback(target, hash);

        self.observers.notify_new_block(&tip.into_fork()).await;
        Ok(())
    }

    /// Hash of the rollback target: from the recent window when it lies below
    /// the discarded tip, otherwise from the source.
    async fn resolve_rollback_hash(&self, target: u64, tip_height: u64) -> Result<String, ScanError> {
        if target < tip_height {
            match self.store.get_block(target).await {
                Ok(Some(header)) => return Ok(header.hash),
                Ok(None) => {}
                Err(e) => warn!(height = target, error = %e, "can not load local block"),
            }
        }
        self.source
            .block_at(target)
            .await
            .map(|b| b.hash)
            .map_err(|e| {
                error!(height = target, error = %e, "block scanner can not get new block");
                ScanError::ForkResolution {
                    height: target,
                    reason: e.to_string(),
                }
            })
    }

    fn synthesize_header(&self, height: u64, hash: &str) -> BlockHeader {
        BlockHeader {
            height,
            hash: hash.to_string(),
            parent_hash: String::new(),
            time: 0,
            is_fork: false,
            symbol: self.config.symbol.clone(),
        }
    }

    /// Extract a block that extends the cursor and persist it as progress.
    async fn advance(&self, block: Block) -> Result<(), ScanError> {
        let header = block.header(&self.config.symbol);
        info!(height = header.height, hash = %header.hash, "block scanner scanning height");

        self.extract_block(block).await;

        self.store.save_checkpoint(header.height, &header.hash).await?;
        self.store.save_block(&header).await?;
        self.observers.notify_new_block(&header).await;
        Ok(())
    }

    /// Run the pipeline over a block. Failures are already in the ledger.
    async fn extract_block(&self, block: Block) {
        if block.transactions.is_empty() {
            debug!(height = block.height, "block has no transactions");
            return;
        }
        if let Err(e) = self
            .pipeline
            .batch_extract(
                block.height,
                &block.hash,
                block.transactions,
                Arc::clone(&self.matcher),
            )
            .await
        {
            info!(height = block.height, error = %e, "block extracted with failures");
        }
    }

    // ─── Single-height operations ─────────────────────────────────────────────

    /// Scan one height without fork checks or checkpoint movement.
    ///
    /// Idempotent up to re-delivery. A fetch failure is recorded in the unscan
    /// ledger and returned.
    pub async fn scan_block(&self, height: u64) -> Result<BlockHeader, ScanError> {
        let _pass = self.pass_lock.lock().await;
        let header = self.scan_block_at(height).await?;
        self.observers.notify_new_block(&header).await;
        Ok(header)
    }

    /// Fetch and extract one height. Observers get the extracted data only.

    async fn scan_block_at(&self, height: u64) -> Result<BlockHeader, ScanError> {
        let block = match self.source.block_at(height).await {
            Ok(block) => block,
            Err(e) => {
                warn!(height, error = %e, "can not get block");
                record_unscan(self.store.as_ref(), UnscanRecord::new(height, "", e.to_string()))
                    .await;
                return Err(e);
            }
        };
        let header = block.header(&self.config.symbol);
        info!(height, hash = %header.hash, "block scanner scanning height");
        self.extract_block(block).await;
        Ok(header)
    }

    /// Move the checkpoint so the next pass starts scanning at `height`.
    pub async fn set_rescan_block_height(&self, height: u64) -> Result<(), ScanError> {
        if height == 0 {
            return Err(ScanError::InvalidHeight(height));
        }
        let _pass = self.pass_lock.lock().await;
        let target = height - 1;
        let block = self.source.block_at(target).await?;
        self.store.save_checkpoint(target, &block.hash).await?;
        info!(height = target, hash = %block.hash, "scan checkpoint reset");
        Ok(())
    }

    /// Retry every height in the unscan ledger now.
    pub async fn rescan_failed_records(&self) -> SweepReport {
        let _pass = self.pass_lock.lock().await;
        self.sweeper.sweep(Arc::clone(&self.matcher)).await
    }

    // ─── Queries ──────────────────────────────────────────────────────────────

    /// Height of the checkpoint, 0 if there is none or it cannot be read.
    pub async fn scanned_block_height(&self) -> u64 {
        match self.store.load_checkpoint().await {
            Ok(Some(cp)) => cp.height,
            Ok(None) => 0,
            Err(e) => {
                warn!(error = %e, "can not load scan checkpoint");
                0
            }
        }
    }

    /// The header the next pass starts from.
    pub async fn scanned_block_header(&self) -> Result<BlockHeader, ScanError> {
        self.resolve_scanned_header().await
    }

    async fn resolve_scanned_header(&self) -> Result<BlockHeader, ScanError> {
        if let Some(cp) = self.store.load_checkpoint().await? {
            if let Ok(Some(header)) = self.store.get_block(cp.height).await {
                if header.hash == cp.hash {
                    return Ok(header);
                }
            }
            return Ok(self.synthesize_header(cp.height, &cp.hash));
        }

        // Fresh start: begin just below the remote tip.
        let max_height = self.source.current_height().await?;
        let height = max_height.saturating_sub(1);
        if height == 0 {
            return Ok(self.synthesize_header(0, ""));
        }
        let block = self.source.block_at(height).await?;
        Ok(block.header(&self.config.symbol))
    }

    /// Header of the remote tip.
    pub async fn current_block_header(&self) -> Result<BlockHeader, ScanError> {
        let max_height = self.source.current_height().await?;
        let block = self.source.block_at(max_height).await?;
        Ok(block.header(&self.config.symbol))
    }

    /// Remote tip height, 0 if the source cannot be reached.
    pub async fn global_max_block_height(&self) -> u64 {
        match self.source.current_height().await {
            Ok(h) => h,
            Err(e) => {
                warn!(error = %e, "can not get remote block height");
                0
            }
        }
    }

    /// Node balance of each address. Addresses the node cannot answer for are
    /// logged and left out.
    pub async fn balance_by_address(&self, addresses: &[String]) -> Vec<AddressBalance> {
        let mut balances = Vec::with_capacity(addresses.len());
        for address in addresses {
            match self.source.balance_of(address).await {
                Ok(balance) => balances.push(AddressBalance::confirmed(
                    &self.config.symbol,
                    address,
                    balance,
                )),
                Err(e) => warn!(address = %address, error = %e, "can not get address balance"),
            }
        }
        balances
    }

    /// Extract a single transaction on demand, grouped by routing key.
    pub async fn extract_transaction_data(
        &self,
        tx_id: &str,
        matcher: &dyn AddressMatcher,
    ) -> Result<HashMap<String, Vec<ExtractBundle>>, ScanError> {
        let tx = self.source.transaction_by_id(tx_id).await?;
        // Some nodes report neither height nor hash for a lookup by id.
        let block_hash = if tx.block_hash.is_empty() && tx.block_height > 0 {
            self.source.block_at(tx.block_height).await?.hash
        } else {
            tx.block_hash.clone()
        };
        let result = self
            .pipeline
            .extractor()
            .extract(tx.block_height, &block_hash, &tx, matcher);
        if !result.success {
            return Err(ScanError::Extraction {
                tx_id: tx_id.to_string(),
                reason: result.reason,
            });
        }
        Ok(result
            .data
            .into_iter()
            .map(|(key, bundle)| (key, vec![bundle]))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::MemoryScanStore;
    use crate::extract::Extractor;
    use crate::testing::{block, tx, MockChainSource, RecordingObserver};
    use crate::types::ScanTarget;

    struct Harness {
        scanner: BlockScanner,
        source: Arc<MockChainSource>,
        store: Arc<MemoryScanStore>,
        recorder: Arc<RecordingObserver>,
    }

    fn harness_with(source: Arc<MockChainSource>, config: ScanConfig) -> Harness {
        let store = Arc::new(MemoryScanStore::new(config.block_window));
        let observers = Arc::new(ObserverRegistry::new());
        let recorder = RecordingObserver::new();
        observers.add(recorder.clone());
        let pipeline = Arc::new(ExtractionPipeline::new(
            Arc::new(Extractor::new(config.symbol.clone(), config.decimals)),
            store.clone(),
            Arc::clone(&observers),
            config.max_extracting,
        ));
        let matcher: Arc<dyn AddressMatcher> = Arc::new(|t: &ScanTarget| Some(t.address.clone()));
        let scanner = BlockScanner::new(
            config,
            source.clone(),
            store.clone(),
            observers,
            pipeline,
            matcher,
        );
        Harness {
            scanner,
            source,
            store,
            recorder,
        }
    }

    fn harness(source: Arc<MockChainSource>) -> Harness {
        harness_with(source, ScanConfig::default())
    }

    #[tokio::test]
    async fn fresh_start_begins_below_tip() {
        let h = harness(MockChainSource::linear(10));
        let header = h.scanner.scanned_block_header().await.unwrap();
        assert_eq!(header.height, 9);
        assert_eq!(header.hash, "h9");

        let report = h.scanner.scan_block_task().await.unwrap();
        assert_eq!(report.start_height, 9);
        assert_eq!(report.end_height, 10);
        assert_eq!(report.scanned, 1);
        assert_eq!(report.stop, PassStop::CaughtUp);
        assert_eq!(h.scanner.scanned_block_height().await, 10);
    }

    #[tokio::test]
    async fn scans_one_hundred_to_one_hundred_three() {
        let h = harness(MockChainSource::linear(103));
        h.store.save_checkpoint(100, "h100").await.unwrap();

        let report = h.scanner.scan_block_task().await.unwrap();
        assert_eq!(report.scanned, 3);
        assert_eq!(report.forks, 0);

        let cp = h.store.load_checkpoint().await.unwrap().unwrap();
        assert_eq!((cp.height, cp.hash.as_str()), (103, "h103"));

        let heights: Vec<u64> = h.recorder.headers().iter().map(|b| b.height).collect();
        assert_eq!(heights, vec![101, 102, 103]);
        assert!(h.recorder.headers().iter().all(|b| !b.is_fork));

        let mut ids = h.recorder.extracted_tx_ids();
        ids.dedup();
        assert_eq!(ids, vec!["tx101", "tx102", "tx103"]);
        assert!(h.store.unscan_records().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn fork_rolls_back_and_announces_discarded_tip() {
        let source = MockChainSource::linear(3);
        let h = harness(source.clone());
        h.store.save_checkpoint(1, "h1").await.unwrap();
        h.scanner.scan_block_task().await.unwrap();
        assert_eq!(h.scanner.scanned_block_height().await, 3);

        // The chain reorganises: 3 is replaced by 3', and 4' builds on it.
        source.put(block(3, "b", "h2", vec![tx(3, "tx3b", "A", "B")]));
        source.put(block(4, "b", "h3b", vec![tx(4, "tx4b", "A", "B")]));
        h.store
            .save_unscan_record(&UnscanRecord::new(3, "tx3", "stale"))
            .await
            .unwrap();

        let report = h.scanner.scan_block_task().await.unwrap();
        assert_eq!(report.forks, 1);

        let forks: Vec<_> = h.recorder.headers().into_iter().filter(|b| b.is_fork).collect();
        assert_eq!(forks.len(), 1);
        assert_eq!((forks[0].height, forks[0].hash.as_str()), (3, "h3"));
        assert!(h.store.unscan_records_at(3).await.unwrap().is_empty());

        // After the rollback to 2 the new branch is scanned to its tip.
        let cp = h.store.load_checkpoint().await.unwrap().unwrap();
        assert_eq!((cp.height, cp.hash.as_str()), (4, "h4b"));
        assert_eq!(h.store.get_block(3).await.unwrap().unwrap().hash, "h3b");
        let tail: Vec<_> = h
            .recorder
            .headers()
            .into_iter()
            .filter(|b| !b.is_fork)
            .map(|b| b.hash)
            .collect();
        assert_eq!(tail, vec!["h2", "h3", "h3b", "h4b"]);
    }

    #[tokio::test]
    async fn fork_without_local_tip_synthesizes_header() {
        let source = MockChainSource::linear(6);
        let h = harness(source.clone());
        // Checkpoint exists but the window is empty, e.g. after a restart.
        h.store.save_checkpoint(5, "h5-old").await.unwrap();

        let report = h.scanner.scan_block_task().await.unwrap();
        assert_eq!(report.forks, 1);
        let fork = &h.recorder.headers()[0];
        assert!(fork.is_fork);
        assert_eq!((fork.height, fork.hash.as_str()), (5, "h5-old"));
        // Rolled back to 4 (hash from the source), then re-scanned 5 and 6.
        assert_eq!(h.scanner.scanned_block_height().await, 6);
    }

    #[tokio::test]
    async fn unresolvable_rollback_aborts_pass() {
        let source = MockChainSource::linear(5);
        let h = harness(source.clone());
        h.store.save_checkpoint(3, "stale").await.unwrap();
        source.remove(2);

        let err = h.scanner.scan_block_task().await.unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(err, ScanError::ForkResolution { height: 2, .. }));
        // The durable checkpoint is untouched.
        let cp = h.store.load_checkpoint().await.unwrap().unwrap();
        assert_eq!((cp.height, cp.hash.as_str()), (3, "stale"));
    }

    #[tokio::test]
    async fn fetch_failure_is_recorded_and_pass_ends() {
        let source = MockChainSource::linear(8);
        source.fail_block(6, 10);
        let h = harness(source);
        h.store.save_checkpoint(4, "h4").await.unwrap();

        let report = h.scanner.scan_block_task().await.unwrap();
        assert_eq!(report.stop, PassStop::FetchFailed(6));
        assert_eq!(report.end_height, 5);
        assert_eq!(h.scanner.scanned_block_height().await, 5);

        let records = h.store.unscan_records_at(6).await.unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].tx_id.is_empty());
        assert!(records[0].reason.contains("unavailable"));
    }

    #[tokio::test]
    async fn transient_fetch_failure_recovers_in_same_pass() {
        let source = MockChainSource::linear(8);
        source.fail_block(6, 1);
        let h = harness(source);
        h.store.save_checkpoint(4, "h4").await.unwrap();

        let report = h.scanner.scan_block_task().await.unwrap();
        assert_eq!(report.stop, PassStop::CaughtUp);
        assert_eq!(report.end_height, 8);
        // The sweeper re-drove height 6 after the pass and cleared it.
        assert_eq!(report.sweep.recovered, 1);
        assert!(h.store.unscan_records().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unreachable_source_ends_pass_quietly() {
        let source = MockChainSource::linear(8);
        let h = harness(source.clone());
        h.store.save_checkpoint(4, "h4").await.unwrap();
        source.fail_height(true);

        let report = h.scanner.scan_block_task().await.unwrap();
        assert_eq!(report.stop, PassStop::HeightUnavailable);
        assert_eq!(report.scanned, 0);
        assert_eq!(h.scanner.global_max_block_height().await, 0);
    }

    #[tokio::test]
    async fn paused_scanner_does_not_advance() {
        let config = ScanConfig {
            rescan_last_block_count: 2,
            ..ScanConfig::default()
        };
        let source = MockChainSource::linear(8);
        let h = harness_with(source.clone(), config);
        h.store.save_checkpoint(4, "h4").await.unwrap();
        h.store
            .save_unscan_record(&UnscanRecord::new(3, "", "timeout"))
            .await
            .unwrap();

        h.scanner.pause();
        assert!(!h.scanner.is_scanning());
        let report = h.scanner.scan_block_task().await.unwrap();
        assert_eq!(report.stop, PassStop::Paused);
        assert_eq!(report.sweep.attempted, 0);
        assert_eq!(h.scanner.scanned_block_height().await, 4);
        // Neither the rescan nor the sweeper touched the chain.
        assert!(source.fetches().is_empty());
        assert!(h.recorder.headers().is_empty());
        assert!(h.recorder.extracted().is_empty());
        assert_eq!(h.store.unscan_records_at(3).await.unwrap().len(), 1);

        h.scanner.resume();
        h.scanner.scan_block_task().await.unwrap();
        assert_eq!(h.scanner.scanned_block_height().await, 8);
    }

    #[tokio::test]
    async fn scan_block_is_idempotent() {
        let h = harness(MockChainSource::linear(8));
        h.store.save_checkpoint(8, "h8").await.unwrap();

        h.scanner.scan_block(5).await.unwrap();
        let n = h.recorder.extracted().len();
        h.scanner.scan_block(5).await.unwrap();
        let all = h.recorder.extracted();
        assert_eq!(all.len(), n * 2);
        let heights: Vec<u64> = h.recorder.headers().iter().map(|b| b.height).collect();
        assert_eq!(heights, vec![5, 5]);

        let sorted = |mut v: Vec<(String, ExtractBundle)>| {
            v.sort_by(|a, b| a.0.cmp(&b.0));
            v
        };
        assert_eq!(sorted(all[..n].to_vec()), sorted(all[n..].to_vec()));
        // The checkpoint does not move.
        assert_eq!(h.scanner.scanned_block_height().await, 8);
    }

    #[tokio::test]
    async fn rescan_last_blocks_after_pass() {
        let config = ScanConfig {
            rescan_last_block_count: 2,
            ..ScanConfig::default()
        };
        let h = harness_with(MockChainSource::linear(10), config);
        h.store.save_checkpoint(9, "h9").await.unwrap();

        h.scanner.scan_block_task().await.unwrap();
        // Only the new block is announced; 8 and 9 are re-extracted.
        let heights: Vec<u64> = h.recorder.headers().iter().map(|b| b.height).collect();
        assert_eq!(heights, vec![10]);
        let ids = h.recorder.extracted_tx_ids();
        for id in ["tx8", "tx9", "tx10"] {
            assert!(ids.iter().any(|t| t == id), "{id} not re-extracted");
        }
    }

    #[tokio::test]
    async fn caught_up_pass_announces_nothing() {
        let config = ScanConfig {
            rescan_last_block_count: 3,
            ..ScanConfig::default()
        };
        let h = harness_with(MockChainSource::linear(10), config);
        h.store.save_checkpoint(10, "h10").await.unwrap();

        let report = h.scanner.scan_block_task().await.unwrap();
        assert_eq!(report.stop, PassStop::CaughtUp);
        assert!(h.recorder.headers().is_empty());
        let mut ids = h.recorder.extracted_tx_ids();
        ids.dedup();
        assert_eq!(ids, vec!["tx7", "tx8", "tx9"]);
    }

    #[tokio::test]
    async fn empty_block_still_advances() {
        let source = MockChainSource::linear(8);
        source.put(block(6, "", "h5", vec![]));
        let h = harness(source);
        h.store.save_checkpoint(4, "h4").await.unwrap();

        let report = h.scanner.scan_block_task().await.unwrap();
        assert_eq!(report.stop, PassStop::CaughtUp);
        assert_eq!(report.scanned, 4);
        assert_eq!(h.scanner.scanned_block_height().await, 8);
        assert_eq!(h.store.get_block(6).await.unwrap().unwrap().hash, "h6");

        let heights: Vec<u64> = h.recorder.headers().iter().map(|b| b.height).collect();
        assert_eq!(heights, vec![5, 6, 7, 8]);
        let mut ids = h.recorder.extracted_tx_ids();
        ids.dedup();
        assert_eq!(ids, vec!["tx5", "tx7", "tx8"]);
        assert!(h.store.unscan_records().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn balances_skip_failing_addresses() {
        let source = MockChainSource::linear(3);
        source.set_balance("MACa", "12.5");
        source.set_balance("MACc", "0");
        let h = harness(source);

        let addresses: Vec<String> = ["MACa", "MACb", "MACc"].iter().map(|a| a.to_string()).collect();
        let balances = h.scanner.balance_by_address(&addresses).await;
        assert_eq!(balances.len(), 2);
        assert_eq!((balances[0].address.as_str(), balances[0].balance.as_str()), ("MACa", "12.5"));
        assert_eq!(balances[0].confirm_balance, "12.5");
        assert_eq!(balances[0].unconfirm_balance, "0");
        assert_eq!(balances[0].symbol, "MAT");
        assert_eq!(balances[1].address, "MACc");
    }

    #[tokio::test]
    async fn set_rescan_block_height_moves_checkpoint() {
        let h = harness(MockChainSource::linear(10));
        h.store.save_checkpoint(10, "h10").await.unwrap();

        assert!(matches!(
            h.scanner.set_rescan_block_height(0).await,
            Err(ScanError::InvalidHeight(0))
        ));

        h.scanner.set_rescan_block_height(7).await.unwrap();
        let cp = h.store.load_checkpoint().await.unwrap().unwrap();
        assert_eq!((cp.height, cp.hash.as_str()), (6, "h6"));

        let report = h.scanner.scan_block_task().await.unwrap();
        assert_eq!(report.scanned, 4);
    }

    #[tokio::test]
    async fn current_block_header_is_remote_tip() {
        let h = harness(MockChainSource::linear(12));
        let header = h.scanner.current_block_header().await.unwrap();
        assert_eq!((header.height, header.hash.as_str()), (12, "h12"));
        assert_eq!(header.symbol, "MAT");
    }

    #[tokio::test]
    async fn extract_single_transaction() {
        let h = harness(MockChainSource::linear(12));
        let only_b = |t: &ScanTarget| (t.address == "B").then(|| "acct-b".to_string());

        let data = h.scanner.extract_transaction_data("tx7", &only_b).await.unwrap();
        assert_eq!(data.len(), 1);
        let bundles = &data["acct-b"];
        assert_eq!(bundles.len(), 1);
        assert_eq!(bundles[0].outputs[0].block_hash, "h7");

        let err = h
            .scanner
            .extract_transaction_data("missing", &only_b)
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::NotFound(_)));
    }

    #[tokio::test]
    async fn run_stops_on_request() {
        let h = Arc::new(harness(MockChainSource::linear(5)));
        h.store.save_checkpoint(2, "h2").await.unwrap();

        let runner = {
            let h = Arc::clone(&h);
            tokio::spawn(async move { h.scanner.run(Duration::from_millis(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        h.scanner.stop();
        runner.await.unwrap();

        assert_eq!(h.scanner.scanned_block_height().await, 5);
        assert!(!h.scanner.is_scanning());
    }
}
