//! Shared types for the scan pipeline.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

// ─── Blocks ───────────────────────────────────────────────────────────────────

/// The header of a scanned block, as delivered to observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Block height.
    pub height: u64,
    /// Block hash.
    pub hash: String,
    /// Hash of the parent block.
    pub parent_hash: String,
    /// Unix timestamp of the block.
    pub time: u64,
    /// `true` when this header describes a block discarded by a fork.
    pub is_fork: bool,
    /// Asset symbol of the chain the block belongs to.
    pub symbol: String,
}

impl BlockHeader {
    /// Same header, flagged as discarded by a fork.
    pub fn into_fork(mut self) -> Self {
        self.is_fork = true;
        self
    }
}

/// A block fetched from the chain source with its full transaction list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub height: u64,
    pub hash: String,
    pub parent_hash: String,
    pub time: u64,
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Build the observer-facing header for this block.
    pub fn header(&self, symbol: &str) -> BlockHeader {
        BlockHeader {
            height: self.height,
            hash: self.hash.clone(),
            parent_hash: self.parent_hash.clone(),
            time: self.time,
            is_fork: false,
            symbol: symbol.to_string(),
        }
    }
}

/// A single transfer as reported by the chain source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub tx_id: String,
    pub from_address: String,
    pub to_address: String,
    /// Decimal amount, kept as the node reports it.
    pub amount: String,
    pub time: i64,
    #[serde(default)]
    pub note: String,
    pub block_height: u64,
    pub block_hash: String,
}

// ─── Progress ─────────────────────────────────────────────────────────────────

/// The durable `(height, hash)` pair marking scan progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanCheckpoint {
    pub height: u64,
    pub hash: String,
    /// Unix timestamp of when this checkpoint was saved.
    pub updated_at: i64,
}

/// A durable marker for a unit of work that failed and needs a retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnscanRecord {
    /// `hex(sha256("{height}_{tx_id}"))`.
    pub id: String,
    pub block_height: u64,
    /// Empty when the whole block failed.
    pub tx_id: String,
    pub reason: String,
}

impl UnscanRecord {
    pub fn new(block_height: u64, tx_id: impl Into<String>, reason: impl Into<String>) -> Self {
        let tx_id = tx_id.into();
        Self {
            id: sha256_hex(&format!("{block_height}_{tx_id}")),
            block_height,
            tx_id,
            reason: reason.into(),
        }
    }
}

// ─── Extraction ───────────────────────────────────────────────────────────────

/// How balances are tracked by the chain. Only address balances are scanned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BalanceModel {
    Address,
}

/// The value handed to an address matcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanTarget {
    pub address: String,
    pub balance_model: BalanceModel,
}

impl ScanTarget {
    pub fn address(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            balance_model: BalanceModel::Address,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    pub symbol: String,
    pub is_contract: bool,
    #[serde(default)]
    pub contract_id: String,
}

impl Coin {
    pub fn native(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            is_contract: false,
            contract_id: String::new(),
        }
    }
}

/// The spending side of a transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    /// Deterministic id for consumer-side deduplication.
    pub sid: String,
    pub tx_id: String,
    pub address: String,
    pub amount: String,
    pub coin: Coin,
    pub index: u64,
    pub created_at: i64,
    pub block_height: u64,
    pub block_hash: String,
}

/// The receiving side of a transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub sid: String,
    pub tx_id: String,
    pub address: String,
    pub amount: String,
    pub coin: Coin,
    pub index: u64,
    pub created_at: i64,
    pub block_height: u64,
    pub block_hash: String,
}

/// The logical transaction derived for each interested address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxSummary {
    pub wx_id: String,
    pub tx_id: String,
    /// `"address:amount"` entries.
    pub from: Vec<String>,
    pub to: Vec<String>,
    pub amount: String,
    pub fees: String,
    pub coin: Coin,
    pub decimals: u32,
    pub status: String,
    pub reason: String,
    pub block_hash: String,
    pub block_height: u64,
    pub confirm_time: i64,
}

/// Everything extracted from one transaction for one address key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractBundle {
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub transaction: Option<TxSummary>,
}

/// The outcome of extracting a single transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractResult {
    pub tx_id: String,
    pub block_height: u64,
    /// Address key → bundle.
    pub data: HashMap<String, ExtractBundle>,
    pub success: bool,
    /// Failure reason; empty on success.
    pub reason: String,
}

impl ExtractResult {
    pub fn failed(tx_id: impl Into<String>, block_height: u64, reason: impl Into<String>) -> Self {
        Self {
            tx_id: tx_id.into(),
            block_height,
            data: HashMap::new(),
            success: false,
            reason: reason.into(),
        }
    }
}

// ─── Balances ─────────────────────────────────────────────────────────────────

/// Balance of one address as reported by the node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressBalance {
    pub symbol: String,
    pub address: String,
    pub balance: String,
    pub confirm_balance: String,
    /// Always `"0"`: the node reports confirmed balances only.
    pub unconfirm_balance: String,
}

impl AddressBalance {
    pub fn confirmed(symbol: &str, address: &str, balance: String) -> Self {
        Self {
            symbol: symbol.to_string(),
            address: address.to_string(),
            confirm_balance: balance.clone(),
            balance,
            unconfirm_balance: "0".into(),
        }
    }
}

// ─── Ids ──────────────────────────────────────────────────────────────────────

/// Lower-case hex SHA-256 of `input`.
pub fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

/// Deterministic id of an input/output leg.
pub fn leg_sid(tx_id: &str, symbol: &str, contract_id: &str, index: u64, output: bool) -> String {
    let side = if output { "out" } else { "in" };
    sha256_hex(&format!("{side}_{tx_id}_{symbol}_{contract_id}_{index}"))
}

/// Deterministic id of a logical transaction.
pub fn wx_id(symbol: &str, tx_id: &str, from: &[String], to: &[String]) -> String {
    sha256_hex(&format!("{symbol}_{tx_id}_{}_{}", from.join(","), to.join(",")))
}

// ─── Tests ────────────────────────────────────────────────────────────────────
