use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::Arc,
};

use bigdecimal::{BigDecimal, Zero};
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    configuration::Config,
    error::Error,
    model::{Exchange, SharePosition, StakingService},
    protocol::field,
    provider::{SourceClient, Subgraph},
    types::{Pair_State_Type, PriceValue},
};

/// Where the reference asset's USD price is read from.
#[derive(Debug, Clone, PartialEq)]
pub enum NativePriceFeed {
    /// `bundle(id: "1") { ethPrice }` of a constant-product subgraph.
    Bundle,
    /// `tokenPrice(id: token) { price }` of a weighted-pool subgraph.
    TokenPrice { token: String },
}

/// Pair from which a reward token's USD price is derived.
#[derive(Debug, Clone, PartialEq)]
pub struct YieldPool {
    pub pool_id: String,
    pub token_address: String,
    pub subgraph: String,
    pub first_block: i64,
}

#[derive(Debug)]
struct YieldSource {
    pool: YieldPool,
    source: Arc<dyn SourceClient>,
}

#[derive(Debug)]
pub struct PriceEnricher {
    exchange: Exchange,
    oracle: Arc<dyn SourceClient>,
    feed: NativePriceFeed,
    price_from_block: i64,
    yield_sources: BTreeMap<StakingService, YieldSource>,
}

impl PriceEnricher {
    pub fn new(
        exchange: Exchange,
        oracle: Arc<dyn SourceClient>,
        feed: NativePriceFeed,
        price_from_block: i64,
    ) -> Self {
        Self {
            exchange,
            oracle,
            feed,
            price_from_block,
            yield_sources: BTreeMap::new(),
        }
    }

    pub fn with_yield_source(
        mut self,
        service: StakingService,
        pool: YieldPool,
        source: Arc<dyn SourceClient>,
    ) -> Self {
        self.yield_sources
            .insert(service, YieldSource { pool, source });
        self
    }

    pub fn from_config(
        config: &Config,
        exchange: Exchange,
        oracle: Arc<dyn SourceClient>,
        feed: NativePriceFeed,
    ) -> Result<Self, Error> {
        let mut enricher = Self::new(
            exchange,
            oracle,
            feed,
            config.price_from_block(exchange),
        );
        for (service, pool) in &config.staking_services {
            let source: Arc<dyn SourceClient> =
                Arc::new(Subgraph::new(config, &pool.subgraph)?);
            enricher = enricher.with_yield_source(*service, pool.clone(), source);
        }
        Ok(enricher)
    }

    /// Attaches the reference-asset price to every record at or after the
    /// exchange's first priced block. One request per call, one alias per
    /// distinct block.
    pub async fn populate_reference_prices(
        &self,
        records: &mut [SharePosition],
    ) -> Result<(), Error> {
        let blocks: BTreeSet<i64> = records
            .iter()
            .map(|r| r.block)
            .filter(|block| *block >= self.price_from_block)
            .collect();

        if blocks.is_empty() {
            return Ok(());
        }

        let prices = self.native_prices(&blocks).await?;
        for record in records.iter_mut() {
            if let Some(price) = prices.get(&record.block) {
                record.native_asset_price_usd = Some(price.clone());
            }
        }

        Ok(())
    }

    /// Attaches the reward-token price to staked records whose service has a
    /// configured yield pool deployed at the record's block.
    pub async fn populate_yield_token_prices(
        &self,
        records: &mut [SharePosition],
    ) -> Result<(), Error> {
        let mut wanted: BTreeMap<StakingService, BTreeSet<i64>> = BTreeMap::new();

        for record in records.iter() {
            let Some(service) = record.staking_service else {
                continue;
            };
            match self.yield_sources.get(&service) {
                Some(yield_source) if record.block >= yield_source.pool.first_block => {
                    wanted.entry(service).or_default().insert(record.block);
                },
                Some(_) => {},
                None => debug!("no yield pool configured for {}", service),
            }
        }

        for (service, blocks) in wanted {
            let Some(yield_source) = self.yield_sources.get(&service) else {
                continue;
            };
            let prices = yield_prices(yield_source, &blocks).await?;

            for record in records
                .iter_mut()
                .filter(|r| r.staking_service == Some(service))
            {
                if let Some(price) = prices.get(&record.block) {
                    record.yield_token_price_usd = Some(price.clone());
                }
            }
        }

        Ok(())
    }

    /// Reference price at `as_of_block` and the latest price of every
    /// configured reward token, for pool snapshots.
    pub async fn current_prices(
        &self,
        as_of_block: i64,
    ) -> Result<(Option<BigDecimal>, BTreeMap<StakingService, BigDecimal>), Error>
    {
        let native = if as_of_block >= self.price_from_block {
            let blocks = BTreeSet::from([as_of_block]);
            self.native_prices(&blocks).await?.remove(&as_of_block)
        } else {
            None
        };

        let mut yields = BTreeMap::new();
        for (service, yield_source) in &self.yield_sources {
            let query = format!(
                "{{ latest: pair(id: \"{}\") {{ {} }} }}",
                yield_source.pool.pool_id, PAIR_FIELDS
            );
            let data = yield_source.source.query(&query, &[]).await?;
            match field::<Option<Pair_State_Type>>(&data, "latest")? {
                Some(pair) => {
                    let price =
                        pair_token_price(&pair, &yield_source.pool.token_address)?;
                    yields.insert(*service, price);
                },
                None => warn!(
                    "{}: yield pool {} not found, {} price omitted",
                    self.exchange, yield_source.pool.pool_id, service
                ),
            }
        }

        Ok((native, yields))
    }

    async fn native_prices(
        &self,
        blocks: &BTreeSet<i64>,
    ) -> Result<HashMap<i64, BigDecimal>, Error> {
        let query = native_price_query(&self.feed, blocks);
        let data = self.oracle.query(&query, &[]).await?;
        read_block_prices(&data, blocks)
    }
}

const PAIR_FIELDS: &str = "id totalSupply reserve0 reserve1 reserveUSD \
     token0 { id symbol name } token1 { id symbol name }";

pub fn native_price_query(feed: &NativePriceFeed, blocks: &BTreeSet<i64>) -> String {
    let mut query = String::from("{");
    for block in blocks {
        let alias = match feed {
            NativePriceFeed::Bundle => format!(
                "\n  b{block}: bundle(id: \"1\", block: {{ number: {block} }}) {{ price: ethPrice }}"
            ),
            NativePriceFeed::TokenPrice { token } => format!(
                "\n  b{block}: tokenPrice(id: \"{token}\", block: {{ number: {block} }}) {{ price }}"
            ),
        };
        query.push_str(&alias);
    }
    query.push_str("\n}");
    query
}

fn yield_price_query(pool_id: &str, blocks: &BTreeSet<i64>) -> String {
    let mut query = String::from("{");
    for block in blocks {
        query.push_str(&format!(
            "\n  b{block}: pair(id: \"{pool_id}\", block: {{ number: {block} }}) {{ {PAIR_FIELDS} }}"
        ));
    }
    query.push_str("\n}");
    query
}

async fn yield_prices(
    yield_source: &YieldSource,
    blocks: &BTreeSet<i64>,
) -> Result<HashMap<i64, BigDecimal>, Error> {
    let query = yield_price_query(&yield_source.pool.pool_id, blocks);
    let data = yield_source.source.query(&query, &[]).await?;
    let mut prices = HashMap::with_capacity(blocks.len());

    for block in blocks {
        let pair = field::<Option<Pair_State_Type>>(&data, &format!("b{}", block))?
            .ok_or(Error::PriceUnavailable { block: *block })?;
        prices.insert(
            *block,
            pair_token_price(&pair, &yield_source.pool.token_address)?,
        );
    }

    Ok(prices)
}

fn read_block_prices(
    data: &Value,
    blocks: &BTreeSet<i64>,
) -> Result<HashMap<i64, BigDecimal>, Error> {
    let mut prices = HashMap::with_capacity(blocks.len());

    for block in blocks {
        let price = field::<Option<PriceValue>>(data, &format!("b{}", block))?
            .and_then(|value| value.price)
            .ok_or(Error::PriceUnavailable { block: *block })?;
        prices.insert(*block, price);
    }

    Ok(prices)
}

/// USD price of one reserve unit given the USD value held on that side.
/// Empty reserves price at zero.
pub fn reserve_price(
    value_usd: &BigDecimal,
    reserve: &BigDecimal,
    symbol: &str,
    context: &str,
) -> BigDecimal {
    if reserve.is_zero() {
        warn!(
            "0 reserves for token {} in {}. Setting token price to 0.",
            symbol, context
        );
        return BigDecimal::zero();
    }
    value_usd / reserve
}

/// Price of `token` in a 50/50 pair: `reserveUSD / (2 * reserve)`.
pub fn pair_token_price(
    pair: &Pair_State_Type,
    token: &str,
) -> Result<BigDecimal, Error> {
    let (symbol, reserve) = if pair.token0.id == token {
        (&pair.token0.symbol, &pair.reserve0)
    } else if pair.token1.id == token {
        (&pair.token1.symbol, &pair.reserve1)
    } else {
        return Err(Error::MalformedRecord(format!(
            "token {} is not part of pair {}",
            token, pair.id
        )));
    };

    let half = &pair.reserve_usd / BigDecimal::from(2);
    Ok(reserve_price(&half, reserve, symbol, &pair.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::testing::FakeSource;
    use serde_json::json;
    use std::str::FromStr;

    fn record(block: i64, service: Option<StakingService>) -> SharePosition {
        SharePosition {
            id: format!("snap-{}", block),
            protocol: Exchange::UNI_V2,
            user_address: String::from("0xuser"),
            pool_id: String::from("0xpool"),
            liquidity_balance: BigDecimal::from(1),
            liquidity_total_supply: BigDecimal::from(10),
            tokens: vec![],
            block,
            timestamp: 0,
            tx_hash: None,
            tx_cost_native: BigDecimal::zero(),
            native_asset_price_usd: None,
            staking_service: service,
            yield_token_price_usd: None,
        }
    }

    fn pair_json(reserve0: &str, reserve_usd: &str) -> Value {
        json!({
            "id": "0xyield",
            "totalSupply": "10",
            "reserve0": reserve0,
            "reserve1": "50",
            "reserveUSD": reserve_usd,
            "token0": {"id": "0xuni", "symbol": "UNI", "name": "Uniswap"},
            "token1": {"id": "0xweth", "symbol": "WETH", "name": "Wrapped Ether"}
        })
    }

    #[tokio::test]
    async fn test_reference_prices_one_alias_per_block() {
        let oracle = Arc::new(FakeSource::new().on(
            "bundle(",
            json!({"b100": {"price": "350.5"}, "b120": {"price": "360"}}),
        ));
        let enricher =
            PriceEnricher::new(Exchange::UNI_V2, oracle.clone(), NativePriceFeed::Bundle, 100);

        let mut records = vec![record(90, None), record(100, None), record(100, None), record(120, None)];
        enricher.populate_reference_prices(&mut records).await.unwrap();

        assert_eq!(records[0].native_asset_price_usd, None);
        assert_eq!(
            records[1].native_asset_price_usd,
            Some(BigDecimal::from_str("350.5").unwrap())
        );
        assert_eq!(records[2].native_asset_price_usd, records[1].native_asset_price_usd);
        assert_eq!(records[3].native_asset_price_usd, Some(BigDecimal::from(360)));

        let sent = oracle.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].matches("bundle(").count(), 2);
        assert!(!sent[0].contains("b90"));
    }

    #[tokio::test]
    async fn test_missing_reference_price_is_fatal() {
        let oracle = Arc::new(FakeSource::new().on("tokenPrice(", json!({"b100": null})));
        let enricher = PriceEnricher::new(
            Exchange::BALANCER,
            oracle,
            NativePriceFeed::TokenPrice {
                token: String::from("0xweth"),
            },
            0,
        );

        let mut records = vec![record(100, None)];
        let err = enricher
            .populate_reference_prices(&mut records)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PriceUnavailable { block: 100 }));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_yield_token_prices() {
        let oracle = Arc::new(FakeSource::new());
        let yields = Arc::new(
            FakeSource::new().on("pair(", json!({"b200": pair_json("20", "4000")})),
        );
        let enricher =
            PriceEnricher::new(Exchange::UNI_V2, oracle, NativePriceFeed::Bundle, 0)
                .with_yield_source(
                    StakingService::UNI_V2,
                    YieldPool {
                        pool_id: String::from("0xyield"),
                        token_address: String::from("0xuni"),
                        subgraph: String::from("uniswap/uniswap-v2"),
                        first_block: 150,
                    },
                    yields.clone(),
                );

        let mut records = vec![
            record(100, Some(StakingService::UNI_V2)),
            record(200, Some(StakingService::UNI_V2)),
            record(200, None),
            record(200, Some(StakingService::INDEX)),
        ];
        enricher.populate_yield_token_prices(&mut records).await.unwrap();

        assert_eq!(records[0].yield_token_price_usd, None);
        assert_eq!(records[1].yield_token_price_usd, Some(BigDecimal::from(100)));
        assert_eq!(records[2].yield_token_price_usd, None);
        assert_eq!(records[3].yield_token_price_usd, None);
        assert_eq!(yields.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_current_prices() {
        let oracle = Arc::new(FakeSource::new().on("bundle(", json!({"b500": {"price": "400"}})));
        let yields = Arc::new(
            FakeSource::new().on("latest: pair(", json!({"latest": pair_json("0", "4000")})),
        );
        let enricher =
            PriceEnricher::new(Exchange::SUSHI, oracle, NativePriceFeed::Bundle, 0)
                .with_yield_source(
                    StakingService::SUSHI,
                    YieldPool {
                        pool_id: String::from("0xyield"),
                        token_address: String::from("0xuni"),
                        subgraph: String::from("sushi/sushi-swap"),
                        first_block: 0,
                    },
                    yields,
                );

        let (native, yields) = enricher.current_prices(500).await.unwrap();
        assert_eq!(native, Some(BigDecimal::from(400)));
        assert_eq!(yields.get(&StakingService::SUSHI), Some(&BigDecimal::zero()));
    }

    #[test]
    fn test_zero_reserve_prices_at_zero() {
        let price = reserve_price(
            &BigDecimal::from(1000),
            &BigDecimal::zero(),
            "DAI",
            "0xpool",
        );
        assert_eq!(price, BigDecimal::zero());
    }

    #[test]
    fn test_pair_token_price() {
        let pair: Pair_State_Type = serde_json::from_value(pair_json("20", "4000")).unwrap();
        assert_eq!(pair_token_price(&pair, "0xuni").unwrap(), BigDecimal::from(100));
        assert_eq!(pair_token_price(&pair, "0xweth").unwrap(), BigDecimal::from(40));
        assert!(pair_token_price(&pair, "0xother").is_err());
    }

    #[test]
    fn test_native_price_query_shape() {
        let blocks = BTreeSet::from([10, 11]);
        let query = native_price_query(
            &NativePriceFeed::TokenPrice {
                token: String::from("0xweth"),
            },
            &blocks,
        );
        assert!(query.contains(
            "b10: tokenPrice(id: \"0xweth\", block: { number: 10 }) { price }"
        ));
        assert!(query.contains("b11: tokenPrice("));
    }
}
