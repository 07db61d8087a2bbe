//! Turns a raw transfer into per-address bundles.

use std::collections::HashMap;

use crate::error::ScanError;
use crate::types::{
    leg_sid, wx_id, Coin, ExtractBundle, ExtractResult, ScanTarget, Transaction, TxInput,
    TxOutput, TxSummary,
};

/// Decides whether an address is of interest and where its data is routed.
///
/// Returns the routing key (typically an account id) for interesting
/// addresses, `None` otherwise. An `Err` fails extraction of the whole
/// transaction.
pub trait AddressMatcher: Send + Sync {
    fn match_target(&self, target: &ScanTarget) -> Result<Option<String>, ScanError>;
}

impl<F> AddressMatcher for F
where
    F: Fn(&ScanTarget) -> Option<String> + Send + Sync,
{
    fn match_target(&self, target: &ScanTarget) -> Result<Option<String>, ScanError> {
        Ok(self(target))
    }
}

/// Builds extraction results for a single asset.
#[derive(Debug, Clone)]
pub struct Extractor {
    symbol: String,
    decimals: u32,
}

impl Extractor {
    pub fn new(symbol: impl Into<String>, decimals: u32) -> Self {
        Self {
            symbol: symbol.into(),
            decimals,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Extract one transaction against `matcher`.
    ///
    /// A transaction touching no address of interest yields an empty, successful
    /// result.
    pub fn extract(
        &self,
        block_height: u64,
        block_hash: &str,
        tx: &Transaction,
        matcher: &dyn AddressMatcher,
    ) -> ExtractResult {
        match self.build(block_hash, tx, matcher) {
            Ok(data) => ExtractResult {
                tx_id: tx.tx_id.clone(),
                block_height,
                data,
                success: true,
                reason: String::new(),
            },
            Err(e) => {
                tracing::debug!(tx_id = %tx.tx_id, block_height, error = %e, "extract failed");
                ExtractResult::failed(tx.tx_id.clone(), block_height, e.to_string())
            }
        }
    }

    fn build(
        &self,
        block_hash: &str,
        tx: &Transaction,
        matcher: &dyn AddressMatcher,
    ) -> Result<HashMap<String, ExtractBundle>, ScanError> {
        let mut data: HashMap<String, ExtractBundle> = HashMap::new();
        let coin = Coin::native(&self.symbol);
        // The node reports the hash on the transaction; fall back to the block's.
        let block_hash = if tx.block_hash.is_empty() { block_hash } else { &tx.block_hash };

        if let Some(key) = matcher.match_target(&ScanTarget::address(&tx.from_address))? {
            data.entry(key).or_default().inputs.push(TxInput {
                sid: leg_sid(&tx.tx_id, &self.symbol, &coin.contract_id, 0, false),
                tx_id: tx.tx_id.clone(),
                address: tx.from_address.clone(),
                amount: tx.amount.clone(),
                coin: coin.clone(),
                index: 0,
                created_at: tx.time,
                block_height: tx.block_height,
                block_hash: block_hash.to_string(),
            });
        }

        if let Some(key) = matcher.match_target(&ScanTarget::address(&tx.to_address))? {
            data.entry(key).or_default().outputs.push(TxOutput {
                sid: leg_sid(&tx.tx_id, &self.symbol, &coin.contract_id, 0, true),
                tx_id: tx.tx_id.clone(),
                address: tx.to_address.clone(),
                amount: tx.amount.clone(),
                coin: coin.clone(),
                index: 0,
                created_at: tx.time,
                block_height: tx.block_height,
                block_hash: block_hash.to_string(),
            });
        }

        if data.is_empty() {
            return Ok(data);
        }

        let from = vec![format!("{}:{}", tx.from_address, tx.amount)];
        let to = vec![format!("{}:{}", tx.to_address, tx.amount)];
        let summary = TxSummary {
            wx_id: wx_id(&self.symbol, &tx.tx_id, &from, &to),
            tx_id: tx.tx_id.clone(),
            from,
            to,
            amount: tx.amount.clone(),
            // Transfers on this chain carry no fee.
            fees: "0".into(),
            coin,
            decimals: self.decimals,
            status: "1".into(),
            reason: String::new(),
            block_hash: block_hash.to_string(),
            block_height: tx.block_height,
            confirm_time: tx.time,
        };
        for bundle in data.values_mut() {
            bundle.transaction = Some(summary.clone());
        }
        Ok(data)
    }
}
