//! Observer traits + registry.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::ScanError;
use crate::types::{BlockHeader, ExtractBundle};

/// A downstream consumer of scan results.
///
/// Delivery is at-least-once: a height may be re-delivered after a retry or a
/// rescan, so implementations should be idempotent (bundles carry
/// deterministic `sid`/`wx_id` values for that purpose).
#[async_trait]
pub trait ScanObserver: Send + Sync {
    /// Called once per address key with successfully extracted data.
    ///
    /// An error marks the transaction as failed and schedules a retry.
    async fn on_extracted_data(&self, key: &str, data: &ExtractBundle) -> Result<(), ScanError>;

    /// Called once per processed or rolled-back block.
    async fn on_new_block(&self, header: &BlockHeader) -> Result<(), ScanError>;
}

/// Registry of observers notified by the scanner.
#[derive(Default)]
pub struct ObserverRegistry {
    observers: RwLock<Vec<Arc<dyn ScanObserver>>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer.
    pub fn add(&self, observer: Arc<dyn ScanObserver>) {
        self.observers.write().unwrap().push(observer);
    }

    /// Remove a previously registered observer (matched by identity).
    pub fn remove(&self, observer: &Arc<dyn ScanObserver>) -> bool {
        let mut observers = self.observers.write().unwrap();
        let before = observers.len();
        observers.retain(|o| !Arc::ptr_eq(o, observer));
        observers.len() != before
    }

    pub fn len(&self) -> usize {
        self.observers.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Vec<Arc<dyn ScanObserver>> {
        self.observers.read().unwrap().clone()
    }

    /// Deliver every bundle to every observer.
    ///
    /// All deliveries are attempted; the first failure is returned.
    pub async fn notify_extract_data(
        &self,
        data: &HashMap<String, ExtractBundle>,
    ) -> Result<(), ScanError> {
        let mut first_err = None;
        for observer in self.snapshot() {
            for (key, bundle) in data {
                if let Err(e) = observer.on_extracted_data(key, bundle).await {
                    tracing::error!(key = %key, error = %e, "on_extracted_data failed");
                    first_err.get_or_insert(ScanError::Notify {
                        key: key.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Announce a block to every observer. Failures are logged only.
    pub async fn notify_new_block(&self, header: &BlockHeader) {
        for observer in self.snapshot() {
            if let Err(e) = observer.on_new_block(header).await {
                tracing::warn!(
                    height = header.height,
                    is_fork = header.is_fork,
                    error = %e,
                    "on_new_block failed"
                );
            }
        }
    }
}
