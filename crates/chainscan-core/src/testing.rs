//! Scripted chain source and recording observer for tests.
//!
//! Enabled for this crate's own tests and, for downstream crates, through the
//! `test-utils` feature.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use crate::error::ScanError;
use crate::observer::ScanObserver;
use crate::source::ChainSource;
use crate::types::{Block, BlockHeader, ExtractBundle, Transaction};

/// A transfer of `"10"` from `from` to `to` at `height`.
pub fn tx(height: u64, tx_id: &str, from: &str, to: &str) -> Transaction {
    Transaction {
        tx_id: tx_id.to_string(),
        from_address: from.to_string(),
        to_address: to.to_string(),
        amount: "10".into(),
        time: 1_700_000_000 + height as i64,
        note: String::new(),
        block_height: height,
        block_hash: String::new(),
    }
}

/// A block whose hash is `h{height}{suffix}` and whose parent is `parent_hash`.
pub fn block(height: u64, suffix: &str, parent_hash: &str, txs: Vec<Transaction>) -> Block {
    let hash = format!("h{height}{suffix}");
    let transactions = txs
        .into_iter()
        .map(|mut t| {
            t.block_height = height;
            t.block_hash = hash.clone();
            t
        })
        .collect();
    Block {
        height,
        hash,
        parent_hash: parent_hash.to_string(),
        time: height * 10,
        transactions,
    }
}

#[derive(Default)]
struct MockState {
    tip: u64,
    blocks: BTreeMap<u64, Block>,
    /// height → remaining failures before `block_at` succeeds.
    failures: HashMap<u64, u32>,
    height_down: bool,
    fetches: Vec<u64>,
    balances: HashMap<String, String>,
}

/// An in-memory chain that can be reorganized and made to fail on demand.
#[derive(Default)]
pub struct MockChainSource {
    state: Mutex<MockState>,
}

impl MockChainSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Build a linear chain `1..=tip`, each block carrying one transfer `A → B`.
    pub fn linear(tip: u64) -> Arc<Self> {
        let source = Self::new();
        for h in 1..=tip {
            let parent = format!("h{}", h - 1);
            source.put(block(h, "", &parent, vec![tx(h, &format!("tx{h}"), "A", "B")]));
        }
        source
    }

    /// Insert or replace a block; the tip follows the highest block.
    pub fn put(&self, block: Block) {
        let mut state = self.state.lock().unwrap();
        state.tip = state.tip.max(block.height);
        state.blocks.insert(block.height, block);
    }

    pub fn remove(&self, height: u64) {
        self.state.lock().unwrap().blocks.remove(&height);
    }

    pub fn set_tip(&self, tip: u64) {
        self.state.lock().unwrap().tip = tip;
    }

    /// Make the next `times` fetches of `height` fail.
    pub fn fail_block(&self, height: u64, times: u32) {
        self.state.lock().unwrap().failures.insert(height, times);
    }

    /// Make `current_height` fail until called again with `false`.
    pub fn fail_height(&self, down: bool) {
        self.state.lock().unwrap().height_down = down;
    }

    pub fn hash_at(&self, height: u64) -> Option<String> {
        self.state.lock().unwrap().blocks.get(&height).map(|b| b.hash.clone())
    }

    /// Make `balance_of(address)` answer `balance`. Unknown addresses fail.
    pub fn set_balance(&self, address: &str, balance: &str) {
        self.state
            .lock()
            .unwrap()
            .balances
            .insert(address.to_string(), balance.to_string());
    }

    /// Heights requested through `block_at`, in call order.
    pub fn fetches(&self) -> Vec<u64> {
        self.state.lock().unwrap().fetches.clone()
    }
}

#[async_trait]
impl ChainSource for MockChainSource {
    async fn current_height(&self) -> Result<u64, ScanError> {
        let state = self.state.lock().unwrap();
        if state.height_down {
            return Err(ScanError::Source("connection refused".into()));
        }
        Ok(state.tip)
    }

    async fn block_at(&self, height: u64) -> Result<Block, ScanError> {
        let mut state = self.state.lock().unwrap();
        state.fetches.push(height);
        if let Some(left) = state.failures.get_mut(&height) {
            if *left > 0 {
                *left -= 1;
                return Err(ScanError::Source(format!("block {height} unavailable")));
            }
        }
        state
            .blocks
            .get(&height)
            .cloned()
            .ok_or_else(|| ScanError::Source(format!("block {height} not found")))
    }

    async fn transaction_by_id(&self, tx_id: &str) -> Result<Transaction, ScanError> {
        let state = self.state.lock().unwrap();
        state
            .blocks
            .values()
            .flat_map(|b| b.transactions.iter())
            .find(|t| t.tx_id == tx_id)
            .cloned()
            .ok_or_else(|| ScanError::NotFound(format!("transaction {tx_id}")))
    }

    async fn balance_of(&self, address: &str) -> Result<String, ScanError> {
        let state = self.state.lock().unwrap();
        state
            .balances
            .get(address)
            .cloned()
            .ok_or_else(|| ScanError::Source(format!("[1]unknown address {address}")))
    }
}

#[derive(Default)]
struct Recorded {
    extracted: Vec<(String, ExtractBundle)>,
    headers: Vec<BlockHeader>,
}

/// Observer that records everything it is told.
#[derive(Default)]
pub struct RecordingObserver {
    recorded: Mutex<Recorded>,
    fail_key: Mutex<Option<String>>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// An observer rejecting every bundle routed to `key`.
    pub fn failing_on(key: &str) -> Arc<Self> {
        let observer = Self::new();
        observer.set_failing_key(Some(key));
        observer
    }

    pub fn set_failing_key(&self, key: Option<&str>) {
        *self.fail_key.lock().unwrap() = key.map(str::to_string);
    }

    /// `(key, bundle)` pairs in delivery order.
    pub fn extracted(&self) -> Vec<(String, ExtractBundle)> {
        self.recorded.lock().unwrap().extracted.clone()
    }

    /// Source transaction id of each delivered bundle.
    pub fn extracted_tx_ids(&self) -> Vec<String> {
        self.extracted()
            .into_iter()
            .filter_map(|(_, b)| b.transaction.map(|t| t.tx_id))
            .collect()
    }

    pub fn headers(&self) -> Vec<BlockHeader> {
        self.recorded.lock().unwrap().headers.clone()
    }
}

#[async_trait]
impl ScanObserver for RecordingObserver {
    async fn on_extracted_data(&self, key: &str, data: &ExtractBundle) -> Result<(), ScanError> {
        if self.fail_key.lock().unwrap().as_deref() == Some(key) {
            return Err(ScanError::Other(format!("observer rejected {key}")));
        }
        self.recorded
            .lock()
            .unwrap()
            .extracted
            .push((key.to_string(), data.clone()));
        Ok(())
    }

    async fn on_new_block(&self, header: &BlockHeader) -> Result<(), ScanError> {
        self.recorded.lock().unwrap().headers.push(header.clone());
        Ok(())
    }
}
