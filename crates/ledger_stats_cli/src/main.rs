//! ledger-stats CLI: index transactions, ingest block rewards, run swap cycles, compute validator returns.

use clap::{Parser, Subcommand};
use ledger_stats::aggregate::ValidatorReturnEngine;
use ledger_stats::dashboard::{block_reward_series, daily_reward_totals};
use ledger_stats::ledger::{parse_time_bound, yesterday_window};
use ledger_stats::math;
use ledger_stats::pipeline::{
    collect_validator_returns, index_transaction, ingest_block_rewards, record_prices, run_swap_cycle,
};
use ledger_stats::store::{BlockRewardSource, PriceSource};
use ledger_stats::{parse_tx, LcdClient, LedgerClient, PipelineConfig, SqliteStore, SystemClock};
use std::path::PathBuf;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::info;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
        .init();
    let cli = Cli::parse();
    let config = PipelineConfig::load();
    match cli.command {
        Command::IndexTx(args) => run_index_tx(&config, args),
        Command::ParseTx(args) => run_parse_tx(&config, args),
        Command::IngestBlocks(args) => run_ingest_blocks(&config, args),
        Command::SwapCycle(args) => run_swap(&config, args),
        Command::ValidatorReturn(args) => run_validator_return(&config, args),
        Command::CollectReturns(args) => run_collect_returns(&config, args),
        Command::AnnualReturn(args) => run_annual_return(&config, args),
        Command::BlockRewards(args) => run_block_rewards(&config, args),
    }
}

#[derive(Parser)]
#[command(name = "ledger-stats")]
#[command(author = "gorusys <goru.connector@outlook.com>")]
#[command(about = "Transaction normalization and financial aggregation for Terra ledger data")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch a transaction, store it, and index its participants.
    IndexTx(IndexTxArgs),
    /// Fetch a transaction and print its parsed form.
    ParseTx(ParseTxArgs),
    /// Fetch per-validator block rewards for a height range and store them.
    IngestBlocks(IngestBlocksArgs),
    /// Aggregate swaps for the minute before --at.
    SwapCycle(SwapCycleArgs),
    /// Net reward and annualized return over a time range.
    ValidatorReturn(ValidatorReturnArgs),
    /// Store daily return rows for a set of validators.
    CollectReturns(CollectReturnsArgs),
    /// Trailing-window annualized return from stored daily rows.
    AnnualReturn(AnnualReturnArgs),
    /// Daily block reward dashboard series.
    BlockRewards(BlockRewardsArgs),
}

#[derive(Parser)]
struct IndexTxArgs {
    #[arg(long)]
    hash: String,
    #[arg(long, default_value = "./data/ledger_stats.sqlite")]
    db: PathBuf,
}

#[derive(Parser)]
struct ParseTxArgs {
    #[arg(long)]
    hash: String,
    /// Address whose point of view signs transfer amounts.
    #[arg(long)]
    viewer: Option<String>,
}

#[derive(Parser)]
struct IngestBlocksArgs {
    #[arg(long)]
    from_height: u64,
    /// Inclusive.
    #[arg(long)]
    to_height: u64,
    #[arg(long, default_value = "./data/ledger_stats.sqlite")]
    db: PathBuf,
}

#[derive(Parser)]
struct SwapCycleArgs {
    /// RFC3339 or unix seconds; defaults to now.
    #[arg(long)]
    at: Option<String>,
    /// Record current oracle prices for the bucket before aggregating.
    #[arg(long)]
    record_prices: bool,
    #[arg(long, default_value = "./data/ledger_stats.sqlite")]
    db: PathBuf,
}

#[derive(Parser)]
struct ValidatorReturnArgs {
    #[arg(long)]
    operator: String,
    #[arg(long)]
    voting_power: String,
    #[arg(long)]
    from: String,
    #[arg(long)]
    to: String,
    #[arg(long, default_value = "./data/ledger_stats.sqlite")]
    db: PathBuf,
}

#[derive(Parser)]
struct CollectReturnsArgs {
    /// `OPERATOR=AVG_VOTING_POWER`, repeatable.
    #[arg(long = "validator", required = true)]
    validators: Vec<String>,
    /// Any time within the day to collect; defaults to yesterday.
    #[arg(long)]
    day: Option<String>,
    /// Ingest block rewards from this height before computing returns.
    #[arg(long, requires = "to_height")]
    from_height: Option<u64>,
    /// Inclusive end of the ingested height range.
    #[arg(long, requires = "from_height")]
    to_height: Option<u64>,
    #[arg(long, default_value = "./data/ledger_stats.sqlite")]
    db: PathBuf,
}

#[derive(Parser)]
struct AnnualReturnArgs {
    #[arg(long)]
    operator: String,
    #[arg(long, default_value = "./data/ledger_stats.sqlite")]
    db: PathBuf,
}

#[derive(Parser)]
struct BlockRewardsArgs {
    /// Keep only the last N days (0 keeps all).
    #[arg(long, default_value_t = 0)]
    count: usize,
    #[arg(long, default_value = "./data/ledger_stats.sqlite")]
    db: PathBuf,
}

fn engine(config: &PipelineConfig, store: &Arc<SqliteStore>) -> ValidatorReturnEngine {
    ValidatorReturnEngine::new(
        store.clone(),
        store.clone(),
        store.clone(),
        Arc::new(SystemClock),
        config.reward_settings(),
    )
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run_index_tx(config: &PipelineConfig, args: IndexTxArgs) -> Result<(), Box<dyn std::error::Error>> {
    let store = SqliteStore::open(&args.db)?;
    let client = LcdClient::new(config.lcd())?;
    let rt = tokio::runtime::Runtime::new()?;
    let indexed = rt.block_on(async { index_transaction(&client, &store, &args.hash).await })?;
    match indexed {
        Some((tx, records)) => {
            info!(hash = %tx.hash, records = records.len(), "index complete");
            print_json(&records)
        }
        None => print_json(&Vec::<()>::new()),
    }
}

fn run_parse_tx(config: &PipelineConfig, args: ParseTxArgs) -> Result<(), Box<dyn std::error::Error>> {
    let client = LcdClient::new(config.lcd())?;
    let rt = tokio::runtime::Runtime::new()?;
    let tx = rt.block_on(async { client.tx(&args.hash).await })?;
    match tx {
        Some(tx) => print_json(&parse_tx(&tx, args.viewer.as_deref())),
        None => Err(format!("transaction {} not found", args.hash).into()),
    }
}

fn run_ingest_blocks(config: &PipelineConfig, args: IngestBlocksArgs) -> Result<(), Box<dyn std::error::Error>> {
    if args.from_height > args.to_height {
        return Err(format!("--from-height {} is above --to-height {}", args.from_height, args.to_height).into());
    }
    let store = SqliteStore::open(&args.db)?;
    let client = LcdClient::new(config.lcd())?;
    let rt = tokio::runtime::Runtime::new()?;
    let blocks = rt.block_on(async {
        ingest_block_rewards(&client, &store, args.from_height, args.to_height).await
    })?;
    info!(blocks = blocks.len(), requests = client.request_count(), "ingest done");
    let heights: Vec<u64> = blocks.iter().map(|b| b.height).collect();
    print_json(&heights)
}

fn run_swap(config: &PipelineConfig, args: SwapCycleArgs) -> Result<(), Box<dyn std::error::Error>> {
    let store = SqliteStore::open(&args.db)?;
    let client = LcdClient::new(config.lcd())?;
    let now = match args.at.as_deref() {
        Some(s) => parse_time_bound(s)?,
        None => OffsetDateTime::now_utc(),
    };
    let rt = tokio::runtime::Runtime::new()?;
    if args.record_prices {
        rt.block_on(async { record_prices(&client, &store, now).await })?;
    }
    let settings = config.swap_settings();
    let aggregates = rt.block_on(async {
        run_swap_cycle(&client, &store, &store, &store, &settings, now).await
    })?;
    info!(requests = client.request_count(), "swap cycle done");
    print_json(&aggregates)
}

fn run_validator_return(
    config: &PipelineConfig,
    args: ValidatorReturnArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(SqliteStore::open(&args.db)?);
    let from = parse_time_bound(&args.from)?;
    let to = parse_time_bound(&args.to)?;
    let engine = engine(config, &store);
    let rt = tokio::runtime::Runtime::new()?;
    let out = rt.block_on(async {
        engine
            .validator_return(&args.operator, &args.voting_power, from, to)
            .await
    })?;
    print_json(&out)
}

fn run_collect_returns(
    config: &PipelineConfig,
    args: CollectReturnsArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(SqliteStore::open(&args.db)?);
    let day = match args.day.as_deref() {
        Some(s) => parse_time_bound(s)?.date(),
        None => yesterday_window(OffsetDateTime::now_utc()).0.date(),
    };
    let validators = args
        .validators
        .iter()
        .map(|v| match v.split_once('=') {
            Some((op, vp)) if math::is_numeric(vp) => Ok((op.to_string(), vp.to_string())),
            _ => Err(format!("expected OPERATOR=VOTING_POWER, got {v}")),
        })
        .collect::<Result<Vec<_>, _>>()?;
    let engine = engine(config, &store);
    let rt = tokio::runtime::Runtime::new()?;
    if let (Some(from), Some(to)) = (args.from_height, args.to_height) {
        let client = LcdClient::new(config.lcd())?;
        let blocks = rt.block_on(async { ingest_block_rewards(&client, store.as_ref(), from, to).await })?;
        info!(blocks = blocks.len(), "block rewards ingested before collection");
    }
    let infos = rt.block_on(async {
        collect_validator_returns(&engine, store.as_ref(), &validators, day).await
    })?;
    print_json(&infos)
}

fn run_annual_return(config: &PipelineConfig, args: AnnualReturnArgs) -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(SqliteStore::open(&args.db)?);
    let engine = engine(config, &store);
    let rt = tokio::runtime::Runtime::new()?;
    let out = rt.block_on(async { engine.annual_return(&args.operator).await })?;
    print_json(&out)
}

fn run_block_rewards(config: &PipelineConfig, args: BlockRewardsArgs) -> Result<(), Box<dyn std::error::Error>> {
    let store = SqliteStore::open(&args.db)?;
    let now = OffsetDateTime::now_utc();
    let rt = tokio::runtime::Runtime::new()?;
    let (blocks, prices) = rt.block_on(async {
        let blocks = store.block_rewards(OffsetDateTime::UNIX_EPOCH, now).await?;
        let prices = store.daily_prices().await?;
        Ok::<_, ledger_stats::StoreError>((blocks, prices))
    })?;
    let daily = daily_reward_totals(blocks.iter(), now);
    let series = block_reward_series(
        &daily,
        &prices,
        &config.valuation_denom,
        &config.reference_denom,
        Some(args.count),
    )
    .map(|v| math::format(&v));
    info!(days = series.len(), "block reward series");
    print_json(&series)
}
