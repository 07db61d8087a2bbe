//! SQLite storage backend for ChainScan.
//!
//! Persists the checkpoint, the recent-block window and the unscan ledger to a
//! single SQLite file. Every row is keyed by the scanner's symbol, so several
//! scanners can share one database. Uses `sqlx` with WAL mode.
//!
//! # Usage
//! ```rust,no_run
//! use chainscan_storage::sqlite::SqliteScanStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteScanStore::open("./blockchain.db", "MAT", 128).await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteScanStore::in_memory("MAT", 128).await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tracing::debug;

use chainscan_core::checkpoint::ScanStore;
use chainscan_core::error::ScanError;
use chainscan_core::types::{BlockHeader, ScanCheckpoint, UnscanRecord};

fn storage_err(e: sqlx::Error) -> ScanError {
    ScanError::Storage(e.to_string())
}

/// SQLite-backed [`ScanStore`] for one symbol.
pub struct SqliteScanStore {
    pool: SqlitePool,
    symbol: String,
    block_window: u64,
}

impl SqliteScanStore {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./blockchain.db"`) or a full
    /// SQLite URL (`"sqlite:./blockchain.db?mode=rwc"`).
    pub async fn open(
        path: &str,
        symbol: impl Into<String>,
        block_window: u64,
    ) -> Result<Self, ScanError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url).await.map_err(storage_err)?;
        Self::init(pool, symbol.into(), block_window).await
    }

    /// Open an in-memory SQLite database.
    ///
    /// All data is lost when the store is dropped. Ideal for tests.
    pub async fn in_memory(symbol: impl Into<String>, block_window: u64) -> Result<Self, ScanError> {
        // Each connection would see its own database; keep exactly one alive.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(storage_err)?;
        Self::init(pool, symbol.into(), block_window).await
    }

    async fn init(pool: SqlitePool, symbol: String, block_window: u64) -> Result<Self, ScanError> {
        let store = Self {
            pool,
            symbol,
            block_window: block_window.max(1),
        };
        store.init_schema().await?;
        Ok(store)
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Create tables and enable WAL mode.
    async fn init_schema(&self) -> Result<(), ScanError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS scan_checkpoints (
                symbol       TEXT    NOT NULL PRIMARY KEY,
                block_height INTEGER NOT NULL,
                block_hash   TEXT    NOT NULL,
                updated_at   INTEGER NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        // Recent-block window (for fork rollback lookups)
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS scan_blocks (
                symbol       TEXT    NOT NULL,
                block_height INTEGER NOT NULL,
                block_hash   TEXT    NOT NULL,
                parent_hash  TEXT    NOT NULL,
                block_time   INTEGER NOT NULL,
                PRIMARY KEY (symbol, block_height)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS unscan_records (
                id           TEXT    NOT NULL,
                symbol       TEXT    NOT NULL,
                block_height INTEGER NOT NULL,
                tx_id        TEXT    NOT NULL,
                reason       TEXT    NOT NULL,
                PRIMARY KEY (symbol, id)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_unscan_height ON unscan_records (symbol, block_height);",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(())
    }

    /// Number of headers currently held in the recent window.
    pub async fn block_count(&self) -> Result<u64, ScanError> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM scan_blocks WHERE symbol = ?")
            .bind(&self.symbol)
            .fetch_one(&self.pool)
            .await
            .map_err(storage_err)?;
        let cnt: i64 = row.get("cnt");
        Ok(cnt as u64)
    }

    fn unscan_from_row(row: &SqliteRow) -> UnscanRecord {
        UnscanRecord {
            id: row.get("id"),
            block_height: row.get::<i64, _>("block_height") as u64,
            tx_id: row.get("tx_id"),
            reason: row.get("reason"),
        }
    }
}

#[async_trait]
impl ScanStore for SqliteScanStore {
    async fn load_checkpoint(&self) -> Result<Option<ScanCheckpoint>, ScanError> {
        let row = sqlx::query(
            "SELECT block_height, block_hash, updated_at FROM scan_checkpoints WHERE symbol = ?",
        )
        .bind(&self.symbol)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(row.map(|r| ScanCheckpoint {
            height: r.get::<i64, _>("block_height") as u64,
            hash: r.get("block_hash"),
            updated_at: r.get("updated_at"),
        }))
    }

    async fn save_checkpoint(&self, height: u64, hash: &str) -> Result<(), ScanError> {
        sqlx::query(
            "INSERT INTO scan_checkpoints (symbol, block_height, block_hash, updated_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(symbol) DO UPDATE SET
                block_height = excluded.block_height,
                block_hash   = excluded.block_hash,
                updated_at   = excluded.updated_at",
        )
        .bind(&self.symbol)
        .bind(height as i64)
        .bind(hash)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        debug!(symbol = %self.symbol, height, "checkpoint saved");
        Ok(())
    }

    async fn save_block(&self, header: &BlockHeader) -> Result<(), ScanError> {
        sqlx::query(
            "INSERT OR REPLACE INTO scan_blocks (symbol, block_height, block_hash, parent_hash, block_time)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&self.symbol)
        .bind(header.height as i64)
        .bind(&header.hash)
        .bind(&header.parent_hash)
        .bind(header.time as i64)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        // Keep only the newest `block_window` heights.
        sqlx::query(
            "DELETE FROM scan_blocks
             WHERE symbol = ?
               AND block_height <= (SELECT MAX(block_height) FROM scan_blocks WHERE symbol = ?) - ?",
        )
        .bind(&self.symbol)
        .bind(&self.symbol)
        .bind(self.block_window as i64)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(())
    }

    async fn get_block(&self, height: u64) -> Result<Option<BlockHeader>, ScanError> {
        let row = sqlx::query(
            "SELECT block_height, block_hash, parent_hash, block_time
             FROM scan_blocks WHERE symbol = ? AND block_height = ?",
        )
        .bind(&self.symbol)
        .bind(height as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(row.map(|r| BlockHeader {
            height: r.get::<i64, _>("block_height") as u64,
            hash: r.get("block_hash"),
            parent_hash: r.get("parent_hash"),
            time: r.get::<i64, _>("block_time") as u64,
            is_fork: false,
            symbol: self.symbol.clone(),
        }))
    }

    async fn save_unscan_record(&self, record: &UnscanRecord) -> Result<(), ScanError> {
        sqlx::query(
            "INSERT OR REPLACE INTO unscan_records (id, symbol, block_height, tx_id, reason)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&self.symbol)
        .bind(record.block_height as i64)
        .bind(&record.tx_id)
        .bind(&record.reason)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        debug!(height = record.block_height, tx_id = %record.tx_id, "unscan record saved");
        Ok(())
    }

    async fn unscan_records(&self) -> Result<Vec<UnscanRecord>, ScanError> {
        let rows = sqlx::query(
            "SELECT id, block_height, tx_id, reason FROM unscan_records
             WHERE symbol = ? ORDER BY block_height, tx_id",
        )
        .bind(&self.symbol)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(rows.iter().map(Self::unscan_from_row).collect())
    }

    async fn unscan_records_at(&self, height: u64) -> Result<Vec<UnscanRecord>, ScanError> {
        let rows = sqlx::query(
            "SELECT id, block_height, tx_id, reason FROM unscan_records
             WHERE symbol = ? AND block_height = ? ORDER BY tx_id",
        )
        .bind(&self.symbol)
        .bind(height as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(rows.iter().map(Self::unscan_from_row).collect())
    }

    async fn delete_unscan_records(&self, height: u64) -> Result<usize, ScanError> {
        let result = sqlx::query("DELETE FROM unscan_records WHERE symbol = ? AND block_height = ?")
            .bind(&self.symbol)
            .bind(height as i64)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        Ok(result.rows_affected() as usize)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chainscan_core::testing::{MockChainSource, RecordingObserver};
    use chainscan_core::types::ScanTarget;
    use chainscan_core::ScannerBuilder;

    fn header(height: u64) -> BlockHeader {
        BlockHeader {
            height,
            hash: format!("h{height}"),
            parent_hash: format!("h{}", height - 1),
            time: height * 10,
            is_fork: false,
            symbol: "MAT".into(),
        }
    }

    #[tokio::test]
    async fn checkpoint_roundtrip() {
        let store = SqliteScanStore::in_memory("MAT", 128).await.unwrap();
        assert!(store.load_checkpoint().await.unwrap().is_none());

        store.save_checkpoint(1000, "0xabc").await.unwrap();
        store.save_checkpoint(1001, "0xdef").await.unwrap();

        let cp = store.load_checkpoint().await.unwrap().unwrap();
        assert_eq!(cp.height, 1001);
        assert_eq!(cp.hash, "0xdef");
        assert!(cp.updated_at > 0);
    }

    #[tokio::test]
    async fn block_window_is_pruned() {
        let store = SqliteScanStore::in_memory("MAT", 4).await.unwrap();
        for h in 1..=20 {
            store.save_block(&header(h)).await.unwrap();
        }
        assert_eq!(store.block_count().await.unwrap(), 4);
        assert!(store.get_block(16).await.unwrap().is_none());

        let b = store.get_block(17).await.unwrap().unwrap();
        assert_eq!(b.hash, "h17");
        assert_eq!(b.parent_hash, "h16");
        assert_eq!(b.time, 170);
    }

    #[tokio::test]
    async fn replacing_a_block_keeps_one_row() {
        let store = SqliteScanStore::in_memory("MAT", 8).await.unwrap();
        store.save_block(&header(5)).await.unwrap();
        let mut forked = header(5);
        forked.hash = "h5b".into();
        store.save_block(&forked).await.unwrap();

        assert_eq!(store.block_count().await.unwrap(), 1);
        assert_eq!(store.get_block(5).await.unwrap().unwrap().hash, "h5b");
    }

    #[tokio::test]
    async fn unscan_ledger_ops() {
        let store = SqliteScanStore::in_memory("MAT", 128).await.unwrap();
        store.save_unscan_record(&UnscanRecord::new(5, "", "fetch")).await.unwrap();
        store.save_unscan_record(&UnscanRecord::new(5, "tx1", "extract")).await.unwrap();
        store.save_unscan_record(&UnscanRecord::new(9, "tx2", "notify")).await.unwrap();
        store.save_unscan_record(&UnscanRecord::new(5, "tx1", "again")).await.unwrap();

        let all = store.unscan_records().await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].block_height, 5);
        assert_eq!(all[2].block_height, 9);

        let at5 = store.unscan_records_at(5).await.unwrap();
        assert_eq!(at5.len(), 2);
        assert_eq!(at5[1].reason, "again");

        assert_eq!(store.delete_unscan_records(5).await.unwrap(), 2);
        assert_eq!(store.delete_unscan_records(5).await.unwrap(), 0);
        assert_eq!(store.unscan_records().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn state_survives_reopen_and_is_keyed_by_symbol() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blockchain.db");
        let path = path.to_str().unwrap();

        {
            let store = SqliteScanStore::open(path, "MAT", 128).await.unwrap();
            store.save_checkpoint(42, "h42").await.unwrap();
            store.save_block(&header(42)).await.unwrap();
            store.save_unscan_record(&UnscanRecord::new(40, "", "timeout")).await.unwrap();
        }

        let reopened = SqliteScanStore::open(path, "MAT", 128).await.unwrap();
        let cp = reopened.load_checkpoint().await.unwrap().unwrap();
        assert_eq!((cp.height, cp.hash.as_str()), (42, "h42"));
        assert_eq!(reopened.get_block(42).await.unwrap().unwrap().hash, "h42");
        assert_eq!(reopened.unscan_records().await.unwrap().len(), 1);

        let other = SqliteScanStore::open(path, "CXC", 128).await.unwrap();
        assert!(other.load_checkpoint().await.unwrap().is_none());
        assert!(other.get_block(42).await.unwrap().is_none());
        assert!(other.unscan_records().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn scanner_resumes_from_persisted_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blockchain.db");
        let path = path.to_str().unwrap();
        let source = MockChainSource::linear(10);
        let matcher = || -> Arc<dyn chainscan_core::AddressMatcher> {
            Arc::new(|t: &ScanTarget| Some(t.address.clone()))
        };

        {
            let store = Arc::new(SqliteScanStore::open(path, "MAT", 128).await.unwrap());
            store.save_checkpoint(5, "h5").await.unwrap();
            source.set_tip(7);
            let scanner = ScannerBuilder::new()
                .store(store)
                .build(source.clone(), matcher())
                .unwrap();
            scanner.scan_block_task().await.unwrap();
            assert_eq!(scanner.scanned_block_height().await, 7);
        }

        source.set_tip(10);
        let recorder = RecordingObserver::new();
        let store = Arc::new(SqliteScanStore::open(path, "MAT", 128).await.unwrap());
        let scanner = ScannerBuilder::new()
            .store(store)
            .observer(recorder.clone())
            .build(source, matcher())
            .unwrap();
        let report = scanner.scan_block_task().await.unwrap();

        assert_eq!(report.start_height, 7);
        let heights: Vec<u64> = recorder.headers().iter().map(|b| b.height).collect();
        assert_eq!(heights, vec![8, 9, 10]);
    }
}
