//! transferindex CLI: run the ERC-20 transfer indexer and inspect its state.
//!
//! # Commands
//! ```text
//! transferindex run --rpc-url <url> --starting-block <n>
//! transferindex status
//! transferindex transfers [--address <addr>] [--limit <n>] [--offset <n>]
//! transferindex reset-checkpoint --block <n>
//! transferindex info
//! ```
//!
//! Every flag can also be set through the environment (or a `.env` file).

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::Address;
use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;

use transferindex_core::backoff::BackoffPolicy;
use transferindex_core::indexer::{IndexerConfig, DEFAULT_CONTRACT};
use transferindex_core::store::{TransferQuery, TransferStore};
use transferindex_evm::{EvmChainSource, EvmSourceConfig, IndexerBuilder};
use transferindex_storage::postgres::PostgresStorage;
use transferindex_storage::sqlite::SqliteStorage;
use transferindex_storage::InMemoryStorage;

mod logging;

#[derive(Parser)]
#[command(
    name = "transferindex",
    about = "Checkpointed ERC-20 Transfer indexer",
    long_about = "
Indexes ERC-20 Transfer events of one token contract into SQLite or Postgres.
Backfills history from a checkpoint, then follows the chain tip over a
WebSocket subscription, catching up through backfill after any disconnect.

ENVIRONMENT VARIABLES:
  RPC_URL           HTTP JSON-RPC endpoint
  WS_URL            WebSocket endpoint (derived from RPC_URL when unset)
  CONTRACT_ADDRESS  Token contract (default: USDT mainnet)
  STARTING_BLOCK    First block to index when no checkpoint exists
  PROCESS_HIST      Backfill historical blocks (default: true)
  DATABASE_URL      sqlite:<path>, postgres://..., or memory
",
    version
)]
struct Cli {
    /// Storage backend URL
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite:transfers.db", global = true)]
    database_url: String,

    /// Global log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// Per-component log levels, e.g. `transferindex-evm=debug,sqlx=warn`
    #[arg(long, env = "LOG_COMPONENTS", default_value = "", global = true)]
    log_components: String,

    /// Emit JSON structured logs
    #[arg(long, env = "LOG_JSON", global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the indexer until Ctrl-C
    Run(RunArgs),

    /// Print the checkpoint and the number of stored transfers
    Status,

    /// List stored transfers as JSON
    Transfers {
        /// Only transfers sent from or received by this address
        #[arg(long)]
        address: Option<Address>,
        /// Only transfers at or after this block
        #[arg(long)]
        from_block: Option<u64>,
        #[arg(long, default_value_t = 20)]
        limit: u32,
        #[arg(long, default_value_t = 0)]
        offset: u64,
    },

    /// Overwrite the checkpoint (may move it backward)
    #[command(name = "reset-checkpoint")]
    ResetCheckpoint {
        #[arg(long)]
        block: u64,
    },

    /// Show defaults and supported backends
    Info,
}

#[derive(Args)]
struct RunArgs {
    #[arg(long, env = "RPC_URL")]
    rpc_url: String,

    #[arg(long, env = "WS_URL")]
    ws_url: Option<String>,

    #[arg(long, env = "CONTRACT_ADDRESS", default_value_t = DEFAULT_CONTRACT)]
    contract: Address,

    /// First block to index when no checkpoint exists
    #[arg(long, env = "STARTING_BLOCK", value_parser = clap::value_parser!(u64).range(1..))]
    starting_block: u64,

    /// Backfill historical blocks before following the tip
    #[arg(long, env = "PROCESS_HIST", default_value_t = true, action = ArgAction::Set)]
    process_hist: bool,

    /// Stop after this block instead of following the tip
    #[arg(long, env = "TO_BLOCK")]
    to_block: Option<u64>,

    /// Blocks per backfill batch
    #[arg(long, env = "BATCH_SIZE", default_value_t = 10)]
    batch_size: u64,

    /// Largest block span per eth_getLogs call
    #[arg(long, env = "MAX_LOG_RANGE", default_value_t = 2_000)]
    max_log_range: u64,

    #[arg(long, env = "RETRY_INITIAL_MS", default_value_t = 500)]
    retry_initial_ms: u64,

    #[arg(long, env = "RETRY_MAX_MS", default_value_t = 30_000)]
    retry_max_ms: u64,

    /// Give up after this many consecutive failures (default: never)
    #[arg(long, env = "RETRY_MAX_ATTEMPTS")]
    retry_max_attempts: Option<u32>,

    /// Wait before catching up after a lost subscription
    #[arg(long, env = "RECONNECT_DELAY_SECS", default_value_t = 15)]
    reconnect_delay_secs: u64,

    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    request_timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_config = logging::LogConfig {
        level: cli.log_level.clone(),
        json: cli.log_json,
        ..Default::default()
    }
    .with_overrides(&cli.log_components);
    logging::init_tracing(&log_config);

    match cli.command {
        Commands::Run(args) => cmd_run(&cli.database_url, args).await,
        Commands::Status => cmd_status(&cli.database_url).await,
        Commands::Transfers {
            address,
            from_block,
            limit,
            offset,
        } => {
            let mut query = TransferQuery::default().page(limit, offset);
            query.address = address;
            query.from_block = from_block;
            cmd_transfers(&cli.database_url, query).await
        }
        Commands::ResetCheckpoint { block } => cmd_reset(&cli.database_url, block).await,
        Commands::Info => {
            cmd_info();
            Ok(())
        }
    }
}

/// Open the store named by `url`: `postgres://…`, `sqlite:…` (or a bare
/// path), or `memory`.
async fn open_store(url: &str) -> Result<Arc<dyn TransferStore>> {
    if url.starts_with("postgres://") || url.starts_with("postgresql://") {
        let store = PostgresStorage::connect(url)
            .await
            .context("failed to connect to Postgres")?;
        Ok(Arc::new(store))
    } else if url == "memory" {
        Ok(Arc::new(InMemoryStorage::new()))
    } else {
        let store = SqliteStorage::open(url)
            .await
            .with_context(|| format!("failed to open SQLite database {url}"))?;
        Ok(Arc::new(store))
    }
}

async fn cmd_run(database_url: &str, args: RunArgs) -> Result<()> {
    let store = open_store(database_url).await?;

    let source = EvmChainSource::new(EvmSourceConfig {
        rpc_url: args.rpc_url,
        ws_url: args.ws_url,
        max_log_range: args.max_log_range,
        request_timeout_secs: args.request_timeout_secs,
    })
    .context("invalid provider settings")?;
    info!(rpc = %source.rpc_url(), ws = %source.ws_url(), "Provider configured");

    let mut retry = BackoffPolicy::unbounded(
        Duration::from_millis(args.retry_initial_ms),
        Duration::from_millis(args.retry_max_ms),
    );
    if let Some(attempts) = args.retry_max_attempts {
        retry = retry.with_max_attempts(attempts);
    }

    let cancel = CancellationToken::new();
    let mut builder = IndexerBuilder::new()
        .contract(args.contract)
        .starting_block(args.starting_block)
        .backfill(args.process_hist)
        .batch_size(args.batch_size)
        .retry(retry)
        .reconnect_delay(Duration::from_secs(args.reconnect_delay_secs))
        .cancel_token(cancel.clone());
    if let Some(to_block) = args.to_block {
        builder = builder.to_block(to_block);
    }
    let indexer = builder
        .build(Arc::new(source), store)
        .context("invalid indexer configuration")?;

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            cancel.cancel();
        }
    });

    indexer.run().await.context("indexer stopped")?;
    Ok(())
}

async fn cmd_status(database_url: &str) -> Result<()> {
    let store = open_store(database_url).await?;
    let checkpoint = store.load_checkpoint().await?;
    let transfers = store.transfer_count().await?;
    let status = serde_json::json!({
        "last_processed_block": checkpoint,
        "transfers": transfers,
    });
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

async fn cmd_transfers(database_url: &str, query: TransferQuery) -> Result<()> {
    query.validate().context("invalid --limit")?;
    let store = open_store(database_url).await?;
    let transfers = store.list_transfers(&query).await?;
    println!("{}", serde_json::to_string_pretty(&transfers)?);
    Ok(())
}

async fn cmd_reset(database_url: &str, block: u64) -> Result<()> {
    let store = open_store(database_url).await?;
    let previous = store.load_checkpoint().await?;
    store.reset_checkpoint(block).await?;
    println!("Checkpoint moved from {previous} to {block}");
    Ok(())
}

fn cmd_info() {
    let defaults = IndexerConfig::default();
    let source = EvmSourceConfig::default();
    println!("TransferIndex v{}", env!("CARGO_PKG_VERSION"));
    println!("  Default contract: {}", defaults.contract);
    println!("  Default batch size: {} blocks/commit", defaults.batch_size);
    println!("  Default eth_getLogs range cap: {} blocks", source.max_log_range);
    println!(
        "  Default reconnect delay: {:?}",
        defaults.reconnect.next_delay(1).unwrap_or_default()
    );
    println!("  Dedup key: (transaction_hash, log_index)");
    println!("  Storage backends: memory, SQLite (sqlite:<path>), Postgres (postgres://...)");
}
