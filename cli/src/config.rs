//! CLI configuration (`chainscan.toml`).
//!
//! ```toml
//! watch = ["1AddrA", "1AddrB"]
//!
//! [scanner]
//! symbol = "MAT"
//! rescan_last_block_count = 1
//!
//! [node]
//! server_api = "http://127.0.0.1:8080/api"
//!
//! [storage]
//! path = "data/mat/db/blockchain.db"
//!
//! [log]
//! level = "info"
//! json = false
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use chainscan_core::{AddressMatcher, ScanConfig, ScanError, ScanTarget};
use chainscan_http::NodeConfig;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Addresses of interest; each address is its own routing key.
    pub watch: Vec<String>,
    pub scanner: ScanConfig,
    pub node: NodeConfig,
    pub storage: StorageConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite file. Defaults to `data/<lower-case symbol>/db/blockchain.db`.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Read the config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn storage_path(&self) -> PathBuf {
        self.storage.path.clone().unwrap_or_else(|| {
            PathBuf::from("data")
                .join(self.scanner.symbol.to_lowercase())
                .join("db")
                .join("blockchain.db")
        })
    }
}

/// Matches the configured watch list, routing each address to itself.
#[derive(Debug, Clone, Default)]
pub struct WatchList {
    addresses: HashSet<String>,
}

impl WatchList {
    pub fn new<I, S>(addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            addresses: addresses.into_iter().map(Into::into).collect(),
        }
    }
}

impl AddressMatcher for WatchList {
    fn match_target(&self, target: &ScanTarget) -> Result<Option<String>, ScanError> {
        Ok(self
            .addresses
            .contains(&target.address)
            .then(|| target.address.clone()))
    }
}
