//! Concurrent extraction pipeline.
//!
//! ```text
//! dispatcher ──spawn (semaphore-gated)──► extraction tasks
//!                                              │ producer channel
//!                                              ▼
//!                                           relay  (pending queue, select)
//!                                              │ worker channel
//!                                              ▼
//!                                          consumer ── observers / unscan ledger
//!                                              │
//!                                              └── quit (completed == total)
//! ```
//!
//! Tasks never wait on the consumer: the relay accepts every produced result
//! into its pending queue and hands them on one at a time. Delivery order
//! across transactions is unspecified.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Semaphore};
use tracing::{debug, error, info};

use crate::checkpoint::ScanStore;
use crate::error::ScanError;
use crate::extract::{AddressMatcher, Extractor};
use crate::observer::ObserverRegistry;
use crate::types::{ExtractResult, Transaction, UnscanRecord};

/// Reason recorded when observers reject extracted data.
pub const NOTIFY_FAILED_REASON: &str = "ExtractData Notify failed.";

/// Outcome counts of one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Transactions submitted.
    pub total: usize,
    /// Outcomes taken by the consumer.
    pub completed: usize,
    /// Outcomes that failed extraction or delivery.
    pub failed: usize,
}

/// Fans extraction of a block's transactions out over a bounded worker pool.
pub struct ExtractionPipeline {
    extractor: Arc<Extractor>,
    store: Arc<dyn ScanStore>,
    observers: Arc<ObserverRegistry>,
    permits: Arc<Semaphore>,
    max_extracting: usize,
}

impl ExtractionPipeline {
    pub fn new(
        extractor: Arc<Extractor>,
        store: Arc<dyn ScanStore>,
        observers: Arc<ObserverRegistry>,
        max_extracting: usize,
    ) -> Self {
        let max_extracting = max_extracting.max(1);
        Self {
            extractor,
            store,
            observers,
            permits: Arc::new(Semaphore::new(max_extracting)),
            max_extracting,
        }
    }

    pub fn extractor(&self) -> &Extractor {
        &self.extractor
    }

    /// Extract and deliver every transaction of a block.
    ///
    /// Successful transactions are delivered even when siblings fail. Returns
    /// [`ScanError::BatchFailed`] if any transaction failed, after each failure
    /// has been recorded in the unscan ledger.
    pub async fn batch_extract(
        &self,
        block_height: u64,
        block_hash: &str,
        txs: Vec<Transaction>,
        matcher: Arc<dyn AddressMatcher>,
    ) -> Result<BatchReport, ScanError> {
        if txs.is_empty() {
            return Err(ScanError::EmptyBlock { height: block_height });
        }
        let total = txs.len();

        let (producer_tx, producer_rx) = mpsc::channel::<ExtractResult>(self.max_extracting);
        let (worker_tx, worker_rx) = mpsc::channel::<ExtractResult>(1);
        let (quit_tx, quit_rx) = oneshot::channel::<()>();

        let consumer = tokio::spawn(consume(
            block_height,
            total,
            worker_rx,
            quit_tx,
            Arc::clone(&self.store),
            Arc::clone(&self.observers),
        ));

        let dispatcher = tokio::spawn(dispatch(
            block_height,
            block_hash.to_string(),
            txs,
            producer_tx,
            Arc::clone(&self.permits),
            Arc::clone(&self.extractor),
            matcher,
        ));

        relay(producer_rx, worker_tx, quit_rx).await;

        let report = consumer
            .await
            .map_err(|e| ScanError::Other(format!("extract consumer task: {e}")))?;
        dispatcher
            .await
            .map_err(|e| ScanError::Other(format!("extract dispatcher task: {e}")))?;

        let failed = report.failed + (total - report.completed);
        if failed > 0 {
            info!(block_height, failed, total, "block extracted with failures");
            return Err(ScanError::BatchFailed {
                height: block_height,
                failed,
                total,
            });
        }
        debug!(block_height, total, "block extracted");
        Ok(report)
    }
}

/// Spawn one extraction task per transaction, each holding a semaphore permit.
async fn dispatch(
    block_height: u64,
    block_hash: String,
    txs: Vec<Transaction>,
    producer: mpsc::Sender<ExtractResult>,
    permits: Arc<Semaphore>,
    extractor: Arc<Extractor>,
    matcher: Arc<dyn AddressMatcher>,
) {
    let block_hash: Arc<str> = block_hash.into();
    for tx in txs {
        let permit = match Arc::clone(&permits).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                let result = ExtractResult::failed(tx.tx_id, block_height, "worker pool closed");
                let _ = producer.send(result).await;
                continue;
            }
        };
        let producer = producer.clone();
        let extractor = Arc::clone(&extractor);
        let matcher = Arc::clone(&matcher);
        let block_hash = Arc::clone(&block_hash);
        tokio::spawn(async move {
            let result = catch_unwind(AssertUnwindSafe(|| {
                extractor.extract(block_height, &block_hash, &tx, matcher.as_ref())
            }))
            .unwrap_or_else(|_| {
                ExtractResult::failed(tx.tx_id.clone(), block_height, "extraction panicked")
            });
            let _ = producer.send(result).await;
            drop(permit);
        });
    }
}

/// Buffer produced results until the consumer takes them.
///
/// Returns on the quit signal, when the consumer goes away, or once every
/// producer is gone and the queue is drained.
async fn relay(
    mut producer: mpsc::Receiver<ExtractResult>,
    worker: mpsc::Sender<ExtractResult>,
    mut quit: oneshot::Receiver<()>,
) {
    let mut values: VecDeque<ExtractResult> = VecDeque::new();
    let mut producing = true;

    loop {
        if !producing && values.is_empty() {
            return;
        }
        tokio::select! {
            received = producer.recv(), if producing => match received {
                Some(result) => values.push_back(result),
                None => producing = false,
            },
            permit = worker.reserve(), if !values.is_empty() => match permit {
                Ok(permit) => {
                    if let Some(value) = values.pop_front() {
                        permit.send(value);
                    }
                }
                Err(_) => return,
            },
            _ = &mut quit => return,
        }
    }
}

/// The single consumer: deliver successes, record failures, count outcomes.
async fn consume(
    block_height: u64,
    total: usize,
    mut results: mpsc::Receiver<ExtractResult>,
    quit: oneshot::Sender<()>,
    store: Arc<dyn ScanStore>,
    observers: Arc<ObserverRegistry>,
) -> BatchReport {
    let mut report = BatchReport {
        total,
        ..Default::default()
    };
    let mut quit = Some(quit);

    while let Some(result) = results.recv().await {
        if result.success {
            if let Err(e) = observers.notify_extract_data(&result.data).await {
                debug!(block_height, tx_id = %result.tx_id, error = %e, "delivery failed");
                record_unscan(
                    store.as_ref(),
                    UnscanRecord::new(block_height, &result.tx_id, NOTIFY_FAILED_REASON),
                )
                .await;
                report.failed += 1;
            }
        } else {
            info!(block_height, tx_id = %result.tx_id, "transaction extract failed");
            record_unscan(
                store.as_ref(),
                UnscanRecord::new(block_height, &result.tx_id, &result.reason),
            )
            .await;
            report.failed += 1;
        }

        report.completed += 1;
        if report.completed == total {
            if let Some(quit) = quit.take() {
                let _ = quit.send(());
            }
            break;
        }
    }
    report
}

/// Persist an unscan record; a storage failure here can only be logged.
pub(crate) async fn record_unscan(store: &dyn ScanStore, record: UnscanRecord) {
    if let Err(e) = store.save_unscan_record(&record).await {
        error!(
            block_height = record.block_height,
            tx_id = %record.tx_id,
            error = %e,
            "save unscan record failed"
        );
    }
}
