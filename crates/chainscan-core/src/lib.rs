//! chainscan-core — the block scanning engine.
//!
//! # Architecture
//!
//! ```text
//! ScannerBuilder → BlockScanner
//!                      ├── ChainSource         (remote tip, blocks, transactions)
//!                      ├── ScanCursor          (parent hash check, rollback by 2)
//!                      ├── ExtractionPipeline  (semaphore-gated workers, single consumer)
//!                      │     └── Extractor     (per-address bundles)
//!                      ├── ObserverRegistry    (extracted data, new/forked blocks)
//!                      ├── RetrySweeper        (re-drives the unscan ledger)
//!                      └── ScanStore           (checkpoint, recent blocks, unscan ledger)
//! ```

pub mod builder;
pub mod checkpoint;
pub mod config;
pub mod cursor;
pub mod error;
pub mod extract;
pub mod observer;
pub mod pipeline;
pub mod scanner;
pub mod source;
pub mod sweeper;
pub mod types;
pub mod window;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use builder::ScannerBuilder;
pub use checkpoint::{MemoryScanStore, ScanStore};
pub use config::ScanConfig;
pub use cursor::ScanCursor;
pub use error::ScanError;
pub use extract::{AddressMatcher, Extractor};
pub use observer::{ObserverRegistry, ScanObserver};
pub use pipeline::{BatchReport, ExtractionPipeline};
pub use scanner::{BlockScanner, PassReport, PassStop};
pub use source::ChainSource;
pub use sweeper::{RetrySweeper, SweepReport};
pub use types::{
    AddressBalance, Block, BlockHeader, ExtractBundle, ExtractResult, ScanCheckpoint, ScanTarget, Transaction,
    TxInput, TxOutput, TxSummary, UnscanRecord,
};
pub use window::RecentBlocks;
