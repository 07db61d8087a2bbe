//! chainscan-http — `reqwest`-backed chain source for ChainScan.
//!
//! Features:
//! - Action-style node API (`GetBlockHeight`, `GetTransactionRecordHight`,
//!   `GetTransactionRecordHash`, `GetAssetBalanceAds`) over form `POST`
//! - Lenient JSON decoding of node responses
//! - Automatic retry with exponential backoff for transient errors

pub mod client;
pub mod error;
pub mod retry;
pub mod wire;

pub use client::{HttpChainSource, NodeConfig};
pub use error::NodeError;
pub use retry::{RetryConfig, RetryPolicy};
