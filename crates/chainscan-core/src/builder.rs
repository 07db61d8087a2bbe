//! Fluent builder API for creating block scanners.
//!
//! # Example
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use chainscan_core::{ChainSource, ScanTarget, ScannerBuilder};
//! # fn demo(source: Arc<dyn ChainSource>) -> Result<(), chainscan_core::ScanError> {
//! let scanner = ScannerBuilder::new()
//!     .symbol("MAT")
//!     .decimals(8)
//!     .max_extracting(16)
//!     .rescan_last_block_count(2)
//!     .build(source, Arc::new(|t: &ScanTarget| Some(t.address.clone())))?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use crate::checkpoint::{MemoryScanStore, ScanStore};
use crate::config::ScanConfig;
use crate::cursor::ROLLBACK_DEPTH;
use crate::error::ScanError;
use crate::extract::{AddressMatcher, Extractor};
use crate::observer::{ObserverRegistry, ScanObserver};
use crate::pipeline::ExtractionPipeline;
use crate::scanner::BlockScanner;
use crate::source::ChainSource;

/// Fluent builder for [`BlockScanner`].
#[derive(Default)]
pub struct ScannerBuilder {
    config: ScanConfig,
    store: Option<Arc<dyn ScanStore>>,
    observers: Vec<Arc<dyn ScanObserver>>,
}

impl ScannerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: ScanConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the asset symbol (also namespaces persisted state).
    pub fn symbol(mut self, symbol: impl Into<String>) -> Self {
        self.config.symbol = symbol.into();
        self
    }

    pub fn decimals(mut self, decimals: u32) -> Self {
        self.config.decimals = decimals;
        self
    }

    /// Set how many heights below the tip are re-scanned after each pass.
    pub fn rescan_last_block_count(mut self, n: u64) -> Self {
        self.config.rescan_last_block_count = n;
        self
    }

    /// Set the extraction worker limit.
    pub fn max_extracting(mut self, n: usize) -> Self {
        self.config.max_extracting = n;
        self
    }

    /// Set the recent-block window size.
    pub fn block_window(mut self, n: u64) -> Self {
        self.config.block_window = n;
        self
    }

    pub fn max_fetch_failures(mut self, n: u32) -> Self {
        self.config.max_fetch_failures = n;
        self
    }

    /// Set the delay between passes in milliseconds.
    pub fn scan_interval_ms(mut self, ms: u64) -> Self {
        self.config.scan_interval_ms = ms;
        self
    }

    /// Use a persistent store. Defaults to an in-memory store.
    pub fn store(mut self, store: Arc<dyn ScanStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Register an observer.
    pub fn observer(mut self, observer: Arc<dyn ScanObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Build the scanner.
    pub fn build(
        self,
        source: Arc<dyn ChainSource>,
        matcher: Arc<dyn AddressMatcher>,
    ) -> Result<BlockScanner, ScanError> {
        let config = self.config;
        if config.symbol.is_empty() {
            return Err(ScanError::Config("symbol must not be empty".into()));
        }
        if config.max_extracting == 0 {
            return Err(ScanError::Config("max_extracting must be at least 1".into()));
        }
        if config.block_window < ROLLBACK_DEPTH {
            return Err(ScanError::Config(format!(
                "block_window must be at least {ROLLBACK_DEPTH}, got {}",
                config.block_window
            )));
        }

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryScanStore::new(config.block_window)));
        let observers = Arc::new(ObserverRegistry::new());
        for observer in self.observers {
            observers.add(observer);
        }
        let pipeline = Arc::new(ExtractionPipeline::new(
            Arc::new(Extractor::new(config.symbol.clone(), config.decimals)),
            Arc::clone(&store),
            Arc::clone(&observers),
            config.max_extracting,
        ));
        Ok(BlockScanner::new(config, source, store, observers, pipeline, matcher))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockChainSource, RecordingObserver};
    use crate::types::ScanTarget;

    fn everyone() -> Arc<dyn AddressMatcher> {
        Arc::new(|t: &ScanTarget| Some(t.address.clone()))
    }

    #[test]
    fn builder_defaults() {
        let scanner = ScannerBuilder::new()
            .build(MockChainSource::new(), everyone())
            .unwrap();
        let cfg = scanner.config();
        assert_eq!(cfg.symbol, "MAT");
        assert_eq!(cfg.max_extracting, 10);
        assert_eq!(cfg.block_window, 128);
    }

    #[test]
    fn builder_custom() {
        let scanner = ScannerBuilder::new()
            .symbol("CXC")
            .decimals(6)
            .max_extracting(4)
            .rescan_last_block_count(3)
            .scan_interval_ms(500)
            .build(MockChainSource::new(), everyone())
            .unwrap();
        let cfg = scanner.config();
        assert_eq!(scanner.symbol(), "CXC");
        assert_eq!(cfg.decimals, 6);
        assert_eq!(cfg.max_extracting, 4);
        assert_eq!(cfg.rescan_last_block_count, 3);
        assert_eq!(cfg.scan_interval_ms, 500);
    }

    #[test]
    fn rejects_invalid_config() {
        let source = MockChainSource::new();
        let err = ScannerBuilder::new()
            .max_extracting(0)
            .build(source.clone(), everyone())
            .err()
            .unwrap();
        assert!(matches!(err, ScanError::Config(_)));

        let err = ScannerBuilder::new()
            .block_window(1)
            .build(source, everyone())
            .err()
            .unwrap();
        assert!(matches!(err, ScanError::Config(_)));
    }

    #[tokio::test]
    async fn built_scanner_notifies_registered_observers() {
        let recorder = RecordingObserver::new();
        let scanner = ScannerBuilder::new()
            .observer(recorder.clone())
            .build(MockChainSource::linear(4), everyone())
            .unwrap();

        scanner.scan_block_task().await.unwrap();
        assert_eq!(scanner.scanned_block_height().await, 4);
        assert_eq!(recorder.headers().len(), 1);
        assert_eq!(scanner.observers().len(), 1);
    }
}
