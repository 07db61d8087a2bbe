//! chainscan-storage — durable storage backends for ChainScan.
//!
//! Backends:
//! - [`sqlite`] — SQLite via `sqlx` (embedded, single-file persistence)
//!
//! The in-memory store lives in `chainscan-core` as
//! [`MemoryScanStore`](chainscan_core::MemoryScanStore).

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteScanStore;
