use std::{collections::HashMap, env, fs, ops::Deref, str::FromStr, sync::Arc};

use anyhow::Context;
use tokio::sync::{Mutex, OwnedMutexGuard};
use url::Url;

use crate::{
    dao::{FirebaseSink, Sink},
    error::Error,
    handler::prices::YieldPool,
    helpers::parse_tuple_string,
    model::{EntityKind, Exchange, StakingService, WatermarkPolicy},
};

#[derive(Debug)]
pub struct AppState<T>(Arc<T>);

impl<T> AppState<T> {
    pub fn new(state: T) -> AppState<T> {
        AppState(Arc::new(state))
    }
}

impl<T> Clone for AppState<T> {
    fn clone(&self) -> AppState<T> {
        AppState(Arc::clone(&self.0))
    }
}

impl<T> Deref for AppState<T> {
    type Target = Arc<T>;

    fn deref(&self) -> &Arc<T> {
        &self.0
    }
}

/// Process-wide handles, built once at start-up and shared by every stream.
#[derive(Debug)]
pub struct State {
    pub config: Config,
    pub sink: Arc<dyn Sink>,
    pub streams: StreamLocks,
}

impl State {
    pub fn new(config: Config) -> Result<State, Error> {
        let sink = FirebaseSink::new(&config)?;
        Ok(Self::with_sink(config, Arc::new(sink)))
    }

    pub fn with_sink(config: Config, sink: Arc<dyn Sink>) -> State {
        Self {
            config,
            sink,
            streams: StreamLocks::default(),
        }
    }
}

/// At most one run per `(exchange, entity kind)` stream, whether it came
/// from the HTTP routes or the run loop.
#[derive(Debug, Default)]
pub struct StreamLocks {
    locks: Mutex<HashMap<(Exchange, EntityKind), Arc<Mutex<()>>>>,
}

impl StreamLocks {
    /// The stream stays locked until the returned guard is dropped.
    pub async fn try_acquire(
        &self,
        exchange: Exchange,
        kind: EntityKind,
    ) -> Result<OwnedMutexGuard<()>, Error> {
        let lock = self
            .locks
            .lock()
            .await
            .entry((exchange, kind))
            .or_default()
            .clone();

        lock.try_lock_owned()
            .map_err(|_| Error::AlreadyRunning(format!("{} {}", exchange, kind)))
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub graph_host: Url,
    pub sink_url: Url,
    pub sink_auth: Option<String>,
    pub timeout: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub batch_size: i64,
    pub max_records_per_page: usize,
    pub watermark_policy: WatermarkPolicy,
    pub run_interval: u64,
    pub server_host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
    pub uniswap_subgraph: String,
    pub sushi_subgraph: String,
    pub balancer_subgraph: String,
    pub rewards_subgraph: String,
    pub uniswap_tx_subgraph: Option<String>,
    pub staking_services: Vec<(StakingService, YieldPool)>,
    pub native_price_from_block: HashMap<Exchange, i64>,
}

impl Config {
    pub fn dex_subgraph(&self, exchange: Exchange) -> &str {
        match exchange {
            Exchange::UNI_V2 => &self.uniswap_subgraph,
            Exchange::SUSHI => &self.sushi_subgraph,
            Exchange::BALANCER => &self.balancer_subgraph,
        }
    }

    /// First block at which the reference-asset oracle has a price for the
    /// exchange. Records before it keep a null price.
    pub fn price_from_block(&self, exchange: Exchange) -> i64 {
        self.native_price_from_block
            .get(&exchange)
            .copied()
            .unwrap_or(0)
    }
}

pub fn get_configuration() -> Result<Config, Error> {
    let graph_host = Url::parse(&env::var("GRAPH_HOST")?)?;
    let sink_url = Url::parse(&env::var("SINK_URL")?)?;
    let sink_auth = optional_var("SINK_AUTH");
    let timeout = env::var("TIMEOUT")?.parse()?;
    let max_retries = env::var("MAX_RETRIES")?.parse()?;
    let retry_delay_ms = env::var("RETRY_DELAY_MS")?.parse()?;
    let batch_size = env::var("BATCH_SIZE")?.parse()?;
    let max_records_per_page = env::var("MAX_RECORDS_PER_PAGE")?.parse()?;
    let watermark_policy =
        WatermarkPolicy::from_str(&env::var("WATERMARK_POLICY")?)?;
    let run_interval = env::var("RUN_INTERVAL_SEC")?.parse()?;

    let server_host = env::var("SERVER_HOST")?;
    let port: u16 = env::var("PORT")?.parse()?;
    let allowed_origins = env::var("ALLOWED_ORIGINS")?
        .split(',')
        .map(|item| item.to_owned())
        .collect::<Vec<String>>();

    let uniswap_subgraph = env::var("UNISWAP_SUBGRAPH")?;
    let sushi_subgraph = env::var("SUSHI_SUBGRAPH")?;
    let balancer_subgraph = env::var("BALANCER_SUBGRAPH")?;
    let rewards_subgraph = env::var("REWARDS_SUBGRAPH")?;
    let uniswap_tx_subgraph = optional_var("UNISWAP_TX_SUBGRAPH");

    let staking_services = get_staking_services()?;
    let native_price_from_block = get_native_price_from_block()?;

    let config = Config {
        graph_host,
        sink_url,
        sink_auth,
        timeout,
        max_retries,
        retry_delay_ms,
        batch_size,
        max_records_per_page,
        watermark_policy,
        run_interval,
        server_host,
        port,
        allowed_origins,
        uniswap_subgraph,
        sushi_subgraph,
        balancer_subgraph,
        rewards_subgraph,
        uniswap_tx_subgraph,
        staking_services,
        native_price_from_block,
    };

    Ok(config)
}

pub fn set_configuration() -> Result<(), Error> {
    let config_file: &str = ".env";
    let etl_config_file: &str = "etl.conf";

    let directory = env!("CARGO_MANIFEST_DIR");
    let path = format!("{}/{}", directory, config_file);
    let etl_config_path = format!("{}/{}", directory, etl_config_file);

    let config_string = fs::read_to_string(&path)
        .with_context(|| format!("reading {}", path))?;
    let etl_config_string = fs::read_to_string(&etl_config_path)
        .with_context(|| format!("reading {}", etl_config_path))?;

    parse_config_string(config_string);
    parse_config_string(etl_config_string);

    Ok(())
}

fn parse_config_string(config: String) {
    for (key, value) in parse_config_lines(&config) {
        env::set_var(key, value);
    }
}

fn parse_config_lines(config: &str) -> Vec<(&str, &str)> {
    config
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .collect()
}

fn optional_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.is_empty())
}

fn get_staking_services() -> Result<Vec<(StakingService, YieldPool)>, Error> {
    let items = parse_tuple_string(env::var("STAKING_SERVICES")?);
    let mut data = Vec::with_capacity(items.len());

    for c in items {
        let items: Vec<&str> = c.split(',').collect();
        if items.len() != 5 {
            return Err(Error::ConfigurationError(format!(
                "STAKING_SERVICES entry needs 5 fields: {}",
                c
            )));
        }
        let service = StakingService::from_str(items[0])?;
        let pool = YieldPool {
            pool_id: items[1].to_owned(),
            token_address: items[2].to_owned(),
            subgraph: items[3].to_owned(),
            first_block: items[4].parse()?,
        };
        data.push((service, pool));
    }

    Ok(data)
}

fn get_native_price_from_block() -> Result<HashMap<Exchange, i64>, Error> {
    let items = parse_tuple_string(env::var("NATIVE_PRICE_FROM_BLOCK")?);
    let mut data = HashMap::new();

    for c in items {
        let (exchange, block) = c.split_once(',').ok_or_else(|| {
            Error::ConfigurationError(format!(
                "NATIVE_PRICE_FROM_BLOCK entry needs 2 fields: {}",
                c
            ))
        })?;
        data.insert(Exchange::from_str(exchange)?, block.parse()?);
    }

    Ok(data)
}
