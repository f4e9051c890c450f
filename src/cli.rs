//! Command-line entry points.
//!
//! `serve` exposes the HTTP update routes; `update` runs one stream once and
//! `run-loop` keeps re-running it on the configured interval.

use std::{str::FromStr, sync::Arc};

use bigdecimal::BigDecimal;
use clap::{Args, Parser, Subcommand};
use tracing::info;

use crate::{
    configuration::{get_configuration, set_configuration, AppState, Config, State},
    dao::MemorySink,
    error::Error,
    handler::sync_task::sync_task,
    model::{EntityKind, Exchange, StakingService},
    provider::{start_sync, RunOptions},
    server,
};

/// DEX subgraph ETL
#[derive(Parser)]
#[command(name = "dex-etl")]
#[command(about = "DEX liquidity position ETL service", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP server (default if no command specified)
    Serve,

    /// Synchronize one stream once and exit
    Update(SyncArgs),

    /// Synchronize one stream every RUN_INTERVAL_SEC until a fatal error
    RunLoop(SyncArgs),
}

#[derive(Args, Debug, Clone)]
pub struct SyncArgs {
    /// UNI_V2, SUSHI or BALANCER
    pub exchange: String,

    /// snaps, staked_snaps, pools or yields
    pub entity: String,

    /// Minimum pool liquidity in USD, required for pools
    #[arg(long)]
    pub min_liquidity: Option<BigDecimal>,

    /// Only staked_snaps of this service: UNI_V2, SUSHI, INDEX or PANCAKE
    #[arg(long)]
    pub staking_service: Option<StakingService>,

    /// Blocks per window (pool count per page for pools)
    #[arg(long)]
    pub batch_size: Option<i64>,

    /// Write into an in-memory store instead of the configured sink
    #[arg(long)]
    pub dry_run: bool,
}

impl SyncArgs {
    pub fn target(&self) -> Result<(Exchange, EntityKind), Error> {
        let exchange = Exchange::from_str(&self.exchange.to_uppercase())?;
        let kind = EntityKind::from_str(&self.entity)?;
        Ok((exchange, kind))
    }

    pub fn options(&self, config: &Config) -> RunOptions {
        let mut options =
            RunOptions::new(self.batch_size.unwrap_or(config.batch_size));
        options.min_liquidity = self.min_liquidity.clone();
        options.staking_service = self.staking_service;
        options
    }
}

/// Initialize configuration and return Config
pub fn init_config() -> Result<Config, Error> {
    set_configuration()?;
    get_configuration()
}

pub fn init_state(config: Config, dry_run: bool) -> Result<AppState<State>, Error> {
    let state = if dry_run {
        info!("Dry run, records are kept in memory");
        State::with_sink(config, Arc::new(MemorySink::new()))
    } else {
        State::new(config)?
    };
    Ok(AppState::new(state))
}

pub async fn run_serve(config: Config) -> Result<(), Error> {
    let app_state = init_state(config, false)?;
    server::server_task(&app_state).await
}

pub async fn run_update(config: Config, args: &SyncArgs) -> Result<(), Error> {
    let (exchange, kind) = args.target()?;
    let options = args.options(&config);
    let app_state = init_state(config, args.dry_run)?;

    let report = start_sync(app_state, exchange, kind, options).await?;
    info!(
        "{} {}: {} records in {} batches, watermark {:?}{}",
        exchange,
        kind,
        report.records,
        report.batches,
        report.watermark,
        if report.lagged { ", upstream behind" } else { "" }
    );
    Ok(())
}

pub async fn run_loop(config: Config, args: &SyncArgs) -> Result<(), Error> {
    let (exchange, kind) = args.target()?;
    let options = args.options(&config);
    let app_state = init_state(config, args.dry_run)?;

    sync_task(app_state, exchange, kind, options).await
}
