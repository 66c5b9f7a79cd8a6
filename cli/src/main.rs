//! ColdChain CLI: backfill, follow and inspect shipment state.
//!
//! # Commands
//! ```text
//! coldchain run       [--rpc <url>] [--contract <addr>] [--config <file>]
//! coldchain backfill  [--json]
//! coldchain key       <shipment-id>
//! coldchain inspect   --block <n> [--tx <hash>]
//! coldchain info
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;

use coldchain_core::snapshot::{SAFE_MAX_SCALED, SAFE_MIN_SCALED};
use coldchain_core::{EntityKey, IndexerConfig};
use coldchain_evm::{Engine, EngineBuilder, JsonRpcLedger, ProvenanceInspector};

mod logging;
mod output;

use logging::{init_tracing, LogConfig};

#[derive(Parser)]
#[command(
    name = "coldchain",
    about = "Cold-chain shipment projector (ColdChain CLI)",
    long_about = "
ColdChain CLI: reconstruct pharmaceutical shipment custody and temperature
history from a ledger contract's event log, and follow it live.

ENVIRONMENT VARIABLES:
  COLDCHAIN_RPC_URL     JSON-RPC endpoint
  COLDCHAIN_CONTRACT    Ledger contract address
  RUST_LOG              Overrides the configured log filter
",
    version
)]
struct Cli {
    /// JSON config file with `rpc_url`, `indexer` and `log` sections
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// JSON-RPC endpoint
    #[arg(long, global = true, env = "COLDCHAIN_RPC_URL")]
    rpc: Option<String>,

    /// Ledger contract address
    #[arg(long, global = true, env = "COLDCHAIN_CONTRACT")]
    contract: Option<String>,

    /// Enable debug logging for the coldchain crates
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Backfill, then follow new events until Ctrl-C
    Run {
        /// Print snapshots as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Backfill once and print every shipment
    Backfill {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the entity key for a shipment id
    Key {
        /// Human-readable shipment id, e.g. SH-451-B7
        shipment_id: String,
    },

    /// Show block, neighbours and receipt for one row
    Inspect {
        /// Block the row was emitted in
        #[arg(long)]
        block: u64,
        /// Transaction hash of the row
        #[arg(long)]
        tx: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print version and effective defaults
    Info,
}

/// On-disk configuration.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct FileConfig {
    rpc_url: Option<String>,
    /// Per-request HTTP timeout in seconds.
    request_timeout_secs: Option<u64>,
    indexer: IndexerConfig,
    log: LogConfig,
}

const DEFAULT_TIMEOUT_SECS: u64 = 30;

fn load_config(path: Option<&Path>) -> Result<FileConfig> {
    let Some(path) = path else {
        return Ok(FileConfig::default());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing config file {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut file = load_config(cli.config.as_deref())?;

    if cli.verbose {
        file.log.verbose();
    }
    init_tracing(&file.log);

    if let Some(contract) = &cli.contract {
        file.indexer.contract_address = contract.clone();
    }
    if let Some(rpc) = &cli.rpc {
        file.rpc_url = Some(rpc.clone());
    }

    match cli.command {
        Commands::Key { shipment_id } => cmd_key(&shipment_id),
        Commands::Info => cmd_info(&file),
        Commands::Run { json } => cmd_run(&file, json).await,
        Commands::Backfill { json } => cmd_backfill(&file, json).await,
        Commands::Inspect { block, tx, json } => cmd_inspect(&file, block, tx.as_deref(), json).await,
    }
}

// ─── Command implementations ─────────────────────────────────────────────────

fn ledger_client(file: &FileConfig) -> Result<JsonRpcLedger> {
    let url = file
        .rpc_url
        .as_deref()
        .ok_or_else(|| anyhow!("no RPC endpoint: pass --rpc, set COLDCHAIN_RPC_URL or rpc_url in the config file"))?;
    let timeout = Duration::from_secs(file.request_timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS));
    JsonRpcLedger::new(url, &file.indexer.contract_address, timeout).context("creating JSON-RPC client")
}

fn build_engine(file: &FileConfig) -> Result<Engine> {
    let ledger = ledger_client(file)?;
    EngineBuilder::from_config(file.indexer.clone())
        .build_polling(Arc::new(ledger))
        .context("invalid engine configuration")
}

async fn cmd_run(file: &FileConfig, as_json: bool) -> Result<()> {
    let engine = build_engine(file)?;
    let mut updates = engine.store().subscribe_updates();

    let report = engine.start().await.context("starting engine")?;
    tracing::info!(
        discovered = report.discovered,
        reconciled = report.reconciled,
        failed = report.failed,
        "backfill finished; following live events (Ctrl-C to stop)"
    );
    output::print_snapshots(&engine.snapshots(), as_json)?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            res = &mut ctrl_c => {
                res.context("listening for Ctrl-C")?;
                break;
            }
            msg = updates.recv() => match msg {
                Ok(key) => {
                    if let Some(snap) = engine.snapshot(&key) {
                        output::print_snapshot(&snap, as_json)?;
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "update stream lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    engine.shutdown().await;
    let stats = engine.bridge_stats();
    tracing::info!(
        notifications = stats.notifications,
        reconciliations = stats.reconciliations,
        coalesced = stats.coalesced,
        "stopped"
    );
    Ok(())
}

async fn cmd_backfill(file: &FileConfig, as_json: bool) -> Result<()> {
    let engine = build_engine(file)?;
    let report = engine.backfill().await.context("backfill failed")?;
    output::print_snapshots(&engine.snapshots(), as_json)?;
    if !as_json {
        println!();
        println!(
            "head {}  discovered {}  reconciled {}  not found {}  failed {}",
            report.head, report.discovered, report.reconciled, report.not_found, report.failed
        );
    }
    Ok(())
}

async fn cmd_inspect(file: &FileConfig, block: u64, tx: Option<&str>, as_json: bool) -> Result<()> {
    let inspector = ProvenanceInspector::new(Arc::new(ledger_client(file)?));
    let provenance = inspector
        .inspect(block, tx)
        .await
        .with_context(|| format!("loading provenance for block {block}"))?
        .ok_or_else(|| anyhow!("block {block} not found"))?;
    output::print_provenance(&provenance, as_json)
}

fn cmd_key(shipment_id: &str) -> Result<()> {
    println!("{}", EntityKey::from_shipment_id(shipment_id));
    Ok(())
}

fn cmd_info(file: &FileConfig) -> Result<()> {
    let cfg = &file.indexer;
    println!("ColdChain v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Endpoint:            {}", file.rpc_url.as_deref().unwrap_or("(not set)"));
    println!(
        "Contract:            {}",
        if cfg.contract_address.is_empty() { "(not set)" } else { &cfg.contract_address }
    );
    println!();
    println!("Lookback (blocks):   discovery {}  readings {}  lifecycle {}",
        cfg.discovery_lookback, cfg.readings_lookback, cfg.lifecycle_lookback);
    println!("Chunking:            start {} blocks, halve on rate limit, floor 1", cfg.initial_chunk_width);
    println!("Delays (ms):         request {}  backoff {}  poll {}",
        cfg.request_delay_ms, cfg.rate_limit_backoff_ms, cfg.poll_interval_ms);
    println!("Concurrency ceiling: {}", cfg.max_concurrent_fetches);
    println!("Malformed events:    {:?}", cfg.malformed_policy);
    println!(
        "Safe band:           {:.2} to {:.2} °C",
        SAFE_MIN_SCALED as f64 / 100.0,
        SAFE_MAX_SCALED as f64 / 100.0
    );
    Ok(())
}
