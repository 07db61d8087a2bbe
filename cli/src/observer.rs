//! Observer that writes scan results to the log.

use async_trait::async_trait;
use tracing::info;

use chainscan_core::{BlockHeader, ExtractBundle, ScanError, ScanObserver};

pub struct LogObserver;

#[async_trait]
impl ScanObserver for LogObserver {
    async fn on_extracted_data(&self, key: &str, data: &ExtractBundle) -> Result<(), ScanError> {
        let (tx_id, amount) = data
            .transaction
            .as_ref()
            .map(|t| (t.tx_id.as_str(), t.amount.as_str()))
            .unwrap_or_default();
        info!(
            key,
            tx_id,
            amount,
            inputs = data.inputs.len(),
            outputs = data.outputs.len(),
            "extracted data"
        );
        Ok(())
    }

    async fn on_new_block(&self, header: &BlockHeader) -> Result<(), ScanError> {
        if header.is_fork {
            info!(height = header.height, hash = %header.hash, "block discarded by fork");
        } else {
            info!(height = header.height, hash = %header.hash, "new block");
        }
        Ok(())
    }
}
