//! ChainScan CLI — run the block scanner and manage its state.
//!
//! # Commands
//! ```text
//! chainscan scan        [--once]
//! chainscan status
//! chainscan rescan      <height>
//! chainscan scan-block  <height>
//! chainscan unscanned   [--json]
//! chainscan retry
//! chainscan extract-tx  <tx-id>
//! chainscan balance     [<address>...]
//! chainscan info
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use chainscan_core::{BlockScanner, ScannerBuilder, ScanStore};
use chainscan_http::HttpChainSource;
use chainscan_storage::SqliteScanStore;

mod config;
mod observer;

use config::{AppConfig, LogConfig, WatchList};
use observer::LogObserver;

#[derive(Parser)]
#[command(
    name = "chainscan",
    about = "Fork-aware block scanner — ChainScan CLI",
    long_about = "
ChainScan CLI: follow a chain node, extract transfers touching watched
addresses and keep a durable checkpoint and retry ledger.

ENVIRONMENT VARIABLES:
  RUST_LOG    Log filter, overrides [log].level
",
    version
)]
struct Cli {
    /// Path to the TOML config file
    #[arg(short, long, global = true, default_value = "chainscan.toml")]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan continuously (or one pass with --once)
    Scan {
        /// Run a single pass and exit
        #[arg(long)]
        once: bool,
    },

    /// Show the checkpoint and the remote tip
    Status,

    /// Restart scanning at a height on the next pass
    Rescan {
        /// First height to scan again (must be > 0)
        height: u64,
    },

    /// Scan one height without moving the checkpoint
    #[command(name = "scan-block")]
    ScanBlock { height: u64 },

    /// List failed heights and transactions awaiting retry
    Unscanned {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Retry everything in the unscan ledger now
    Retry,

    /// Extract one transaction against the watch list
    #[command(name = "extract-tx")]
    ExtractTx {
        tx_id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Query node balances (defaults to the watch list)
    Balance {
        addresses: Vec<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show configuration and defaults
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let app = AppConfig::load(&cli.config)?;
    init_tracing(&app.log, cli.verbose);

    match cli.command {
        Commands::Info => {
            cmd_info(&app);
            Ok(())
        }
        Commands::Scan { once } => cmd_scan(&app, once).await,
        Commands::Status => cmd_status(&app).await,
        Commands::Rescan { height } => {
            let scanner = build_scanner(&app).await?;
            scanner.set_rescan_block_height(height).await?;
            println!("next scan starts at height {height}");
            Ok(())
        }
        Commands::ScanBlock { height } => {
            let scanner = build_scanner(&app).await?;
            let header = scanner.scan_block(height).await?;
            println!("scanned block {} ({})", header.height, header.hash);
            Ok(())
        }
        Commands::Unscanned { json } => cmd_unscanned(&app, json).await,
        Commands::Retry => {
            let scanner = build_scanner(&app).await?;
            let report = scanner.rescan_failed_records().await;
            println!(
                "retried {} heights: {} recovered, {} still failing",
                report.attempted, report.recovered, report.failed
            );
            Ok(())
        }
        Commands::ExtractTx { tx_id, json } => cmd_extract_tx(&app, &tx_id, json).await,
        Commands::Balance { addresses, json } => cmd_balance(&app, addresses, json).await,
    }
}

fn init_tracing(log: &LogConfig, verbose: bool) {
    let default = if verbose { "debug" } else { log.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if log.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn open_store(app: &AppConfig) -> Result<Arc<SqliteScanStore>> {
    let path = app.storage_path();
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    let path_str = path
        .to_str()
        .with_context(|| format!("storage path is not UTF-8: {}", path.display()))?;
    let store = SqliteScanStore::open(path_str, &app.scanner.symbol, app.scanner.block_window)
        .await
        .with_context(|| format!("opening {}", path.display()))?;
    Ok(Arc::new(store))
}

async fn build_scanner(app: &AppConfig) -> Result<BlockScanner> {
    let store = open_store(app).await?;
    let source = HttpChainSource::new(app.node.clone()).context("building node client")?;
    let scanner = ScannerBuilder::new()
        .config(app.scanner.clone())
        .store(store)
        .observer(Arc::new(LogObserver))
        .build(Arc::new(source), Arc::new(WatchList::new(app.watch.clone())))?;
    Ok(scanner)
}

async fn cmd_scan(app: &AppConfig, once: bool) -> Result<()> {
    if app.watch.is_empty() {
        tracing::warn!("watch list is empty; blocks are followed but nothing is extracted");
    }
    let scanner = Arc::new(build_scanner(app).await?);

    if once {
        let report = scanner.scan_block_task().await?;
        println!(
            "scanned {} → {} ({} blocks, {} forks, stop: {:?})",
            report.start_height, report.end_height, report.scanned, report.forks, report.stop
        );
        return Ok(());
    }

    let runner = {
        let scanner = Arc::clone(&scanner);
        let interval = app.scanner.scan_interval();
        tokio::spawn(async move { scanner.run(interval).await })
    };

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    tracing::info!("shutting down");
    scanner.stop();
    runner.await.context("scanner task")?;
    Ok(())
}

async fn cmd_status(app: &AppConfig) -> Result<()> {
    let scanner = build_scanner(app).await?;
    let scanned = scanner.scanned_block_height().await;
    let remote = scanner.global_max_block_height().await;
    let pending = scanner.store().unscan_records().await?.len();

    println!("Symbol:          {}", app.scanner.symbol);
    println!("Scanned height:  {scanned}");
    println!("Remote height:   {remote}");
    println!("Behind:          {}", remote.saturating_sub(scanned));
    println!("Unscan records:  {pending}");
    Ok(())
}

async fn cmd_unscanned(app: &AppConfig, json: bool) -> Result<()> {
    let store = open_store(app).await?;
    let records = store.unscan_records().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }
    if records.is_empty() {
        println!("no unscan records");
        return Ok(());
    }
    for r in &records {
        let tx = if r.tx_id.is_empty() { "<block>" } else { r.tx_id.as_str() };
        println!("{:>10}  {:<66}  {}", r.block_height, tx, r.reason);
    }
    Ok(())
}

async fn cmd_extract_tx(app: &AppConfig, tx_id: &str, json: bool) -> Result<()> {
    let scanner = build_scanner(app).await?;
    let watch = WatchList::new(app.watch.clone());
    let data = scanner.extract_transaction_data(tx_id, &watch).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }
    if data.is_empty() {
        println!("transaction {tx_id} touches no watched address");
    }
    for (key, bundles) in &data {
        for b in bundles {
            println!("{key}: {} inputs, {} outputs", b.inputs.len(), b.outputs.len());
        }
    }
    Ok(())
}

async fn cmd_balance(app: &AppConfig, addresses: Vec<String>, json: bool) -> Result<()> {
    let addresses = if addresses.is_empty() { app.watch.clone() } else { addresses };
    if addresses.is_empty() {
        anyhow::bail!("no addresses given and the watch list is empty");
    }
    let scanner = build_scanner(app).await?;
    let balances = scanner.balance_by_address(&addresses).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&balances)?);
        return Ok(());
    }
    for b in &balances {
        println!("{:<42}  {} {}", b.address, b.balance, b.symbol);
    }
    let missing = addresses.len() - balances.len();
    if missing > 0 {
        println!("{missing} address(es) could not be queried");
    }
    Ok(())
}

fn cmd_info(app: &AppConfig) {
    println!("ChainScan v{}", env!("CARGO_PKG_VERSION"));
    println!("  Symbol: {}", app.scanner.symbol);
    println!("  Node API: {}", app.node.server_api);
    println!("  Storage: {}", app.storage_path().display());
    println!("  Watched addresses: {}", app.watch.len());
    println!("  Extraction workers: {}", app.scanner.max_extracting);
    println!("  Recent-block window: {} blocks", app.scanner.block_window);
    println!("  Rollback depth on fork: {} blocks", chainscan_core::cursor::ROLLBACK_DEPTH);
    println!("  Scan interval: {} ms", app.scanner.scan_interval_ms);
}
