use std::{collections::HashSet, sync::Arc};

use bigdecimal::{BigDecimal, Zero};
use futures::{stream, StreamExt};
use tracing::{debug, warn};

use crate::{
    error::Error,
    handler::prices::{reserve_price, PriceEnricher},
    helpers::tx_cost_native,
    model::{
        CurrencyRef, Exchange, Pool, PoolToken, SharePosition, StakingService,
        YieldReward,
    },
    provider::SourceClient,
    types::{Balancer_Pool_Type, Meta, Pool_Share_Type, Transaction_Type},
};

use super::{
    balancer_queries::*, check_query_limit, field, head_bounded_windows,
    offset_pages, rewards, Batches, Page, ProtocolAdapter,
};

pub const WETH: &str = "0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2";

/// Weighted pools. Every join and exit is read back as the user's pool share
/// right after the transaction; there is no staking side-channel.
#[derive(Debug)]
pub struct Balancer {
    dex: Arc<dyn SourceClient>,
    rewards: Arc<dyn SourceClient>,
    prices: PriceEnricher,
}

impl Balancer {
    pub fn new(
        dex: Arc<dyn SourceClient>,
        rewards: Arc<dyn SourceClient>,
        prices: PriceEnricher,
    ) -> Self {
        Self {
            dex,
            rewards,
            prices,
        }
    }

    async fn position_page(
        &self,
        from_block: i64,
        to_block: i64,
    ) -> Result<Page<SharePosition>, Error> {
        let params = [
            ("$MIN_BLOCK", from_block.to_string()),
            ("$MAX_BLOCK", to_block.to_string()),
        ];
        let data = self.dex.query(TRANSACTIONS_QUERY, &params).await?;
        let txs: Vec<Transaction_Type> = field(&data, "transactions")?;
        check_query_limit("transactions", txs.len())?;

        let raw_count = txs.len();
        let txs = dedup_transactions(txs);
        if txs.is_empty() {
            return Ok(Page {
                raw_count,
                records: vec![],
            });
        }

        let shares = self.dex.query(&share_query(&txs), &[]).await?;
        let mut records = Vec::with_capacity(txs.len());

        for tx in txs {
            let alias = share_alias(&tx.tx);
            let mut found: Vec<Pool_Share_Type> = field(&shares, &alias)?;
            if found.len() != 1 {
                warn!(
                    "Incorrect number of pool shares for tx {}: {}, skipping",
                    tx.tx,
                    found.len()
                );
                continue;
            }
            let Some(share) = found.pop() else { continue };
            let tx_hash = tx.tx.clone();
            match self.build_position(tx, share) {
                Ok(record) => records.push(record),
                Err(e) => warn!("Skipping tx {}: {}", tx_hash, e),
            }
        }

        records.sort_by_key(|record| record.block);
        if !records.is_empty() {
            self.prices.populate_reference_prices(&mut records).await?;
        }

        Ok(Page { raw_count, records })
    }

    fn build_position(
        &self,
        tx: Transaction_Type,
        share: Pool_Share_Type,
    ) -> Result<SharePosition, Error> {
        let tx_cost = tx_cost_native(&tx.gas_used, &tx.gas_price);
        let tokens = pool_tokens(&share.pool_id)?;

        Ok(SharePosition {
            id: tx.tx.clone(),
            protocol: Exchange::BALANCER,
            user_address: share.user_address.id,
            pool_id: share.pool_id.id,
            liquidity_balance: share.balance,
            liquidity_total_supply: share.pool_id.total_shares,
            tokens,
            block: tx.block,
            timestamp: tx.timestamp,
            tx_hash: Some(tx.tx),
            tx_cost_native: tx_cost,
            native_asset_price_usd: None,
            staking_service: None,
            yield_token_price_usd: None,
        })
    }

    async fn pools_page(
        &self,
        skip: i64,
        first: i64,
        min_liquidity: BigDecimal,
    ) -> Result<Page<Pool>, Error> {
        let params = [
            ("$FIRST", first.to_string()),
            ("$SKIP", skip.to_string()),
            ("$MIN_LIQUIDITY", format!("\"{}\"", min_liquidity.to_plain_string())),
        ];
        let data = self.dex.query(POOLS_QUERY, &params).await?;
        let meta: Meta = field(&data, "_meta")?;
        let pools: Vec<Balancer_Pool_Type> = field(&data, "pools")?;

        let raw_count = pools.len();
        if pools.is_empty() {
            return Ok(Page::empty());
        }

        let as_of_block = meta.block.number;
        let (native_price, yield_prices) =
            self.prices.current_prices(as_of_block).await?;

        let mut records = Vec::with_capacity(raw_count);
        for pool in pools {
            let tokens = match pool_tokens(&pool) {
                Ok(tokens) => tokens,
                Err(e) => {
                    warn!("Skipping pool {}: {}", pool.id, e);
                    continue;
                },
            };
            records.push(Pool {
                tokens,
                id: pool.id,
                protocol: Exchange::BALANCER,
                liquidity_total_supply: pool.total_shares,
                as_of_block,
                native_asset_price_usd: native_price.clone(),
                yield_token_prices: yield_prices.clone(),
            });
        }

        Ok(Page { raw_count, records })
    }
}

impl ProtocolAdapter for Balancer {
    fn exchange(&self) -> Exchange {
        Exchange::BALANCER
    }

    fn fetch_position_batches(
        &self,
        from_block: i64,
        batch_size: i64,
    ) -> Batches<'_, SharePosition> {
        head_bounded_windows(
            vec![self.dex.as_ref()],
            from_block,
            batch_size,
            move |from, to| self.position_page(from, to),
        )
    }

    fn fetch_staked_position_batches(
        &self,
        _from_block: i64,
        _batch_size: i64,
        _staking_service: Option<StakingService>,
    ) -> Batches<'_, SharePosition> {
        stream::once(async {
            Err::<Vec<SharePosition>, _>(Error::NotSupported(String::from(
                "BALANCER has no staking side-channel",
            )))
        })
        .boxed()
    }

    fn fetch_pools(
        &self,
        batch_size: i64,
        min_liquidity: BigDecimal,
    ) -> Batches<'_, Pool> {
        offset_pages(batch_size, move |skip, first| {
            self.pools_page(skip, first, min_liquidity.clone())
        })
    }

    fn fetch_yield_rewards(
        &self,
        from_block: i64,
        batch_size: i64,
    ) -> Batches<'_, YieldReward> {
        let source = self.rewards.as_ref();
        head_bounded_windows(vec![source], from_block, batch_size, move |from, to| {
            rewards::fetch_rewards_page(source, Exchange::BALANCER, from, to)
        })
    }
}

/// The upstream returns some transactions twice. Keeps the first occurrence
/// of every transaction id.
pub fn dedup_transactions(txs: Vec<Transaction_Type>) -> Vec<Transaction_Type> {
    let mut seen = HashSet::new();
    let before = txs.len();
    let txs: Vec<Transaction_Type> = txs
        .into_iter()
        .filter(|tx| seen.insert(tx.tx.clone()))
        .collect();
    if txs.len() < before {
        debug!("dropped {} duplicate transactions", before - txs.len());
    }
    txs
}

/// Normalized weights `denormWeight / totalWeight`; price
/// `liquidity * weight / reserve`.
fn pool_tokens(pool: &Balancer_Pool_Type) -> Result<Vec<PoolToken>, Error> {
    if pool.total_weight.is_zero() {
        return Err(Error::MalformedRecord(format!(
            "pool {} has zero total weight",
            pool.id
        )));
    }

    let tokens = pool
        .tokens
        .iter()
        .map(|token| {
            let weight = &token.denorm_weight / &pool.total_weight;
            let value_usd = &pool.liquidity * &weight;
            PoolToken {
                currency: CurrencyRef::ethereum(
                    token.symbol.clone(),
                    token.name.clone(),
                    token.address.clone(),
                ),
                price_usd: reserve_price(
                    &value_usd,
                    &token.balance,
                    &token.symbol,
                    &pool.id,
                ),
                weight,
                reserve: token.balance.clone(),
            }
        })
        .collect();

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        handler::prices::NativePriceFeed, provider::testing::FakeSource,
    };
    use futures::TryStreamExt;
    use serde_json::{json, Value};

    fn tx_json(tx: &str, block: i64, user: &str) -> Value {
        json!({
            "tx": tx,
            "block": block,
            "timestamp": 1600000000 + block,
            "gasUsed": "100000",
            "gasPrice": "20000000000",
            "poolAddress": {"id": "0xbpool"},
            "userAddress": {"id": user},
            "event": "join",
        })
    }

    fn pool_json() -> Value {
        json!({
            "id": "0xbpool",
            "totalWeight": "50",
            "totalShares": "100",
            "liquidity": "10000",
            "tokens": [
                {"symbol": "WETH", "name": "Wrapped Ether", "address": WETH,
                 "denormWeight": "40", "balance": "20"},
                {"symbol": "DAI", "name": null, "address": "0xdai",
                 "denormWeight": "10", "balance": "0"},
            ],
        })
    }

    fn share_json(user: &str, balance: &str) -> Value {
        json!({"userAddress": {"id": user}, "balance": balance, "poolId": pool_json()})
    }

    fn adapter(dex: FakeSource) -> (Arc<FakeSource>, Balancer) {
        let dex = Arc::new(dex);
        let prices = PriceEnricher::new(
            Exchange::BALANCER,
            dex.clone(),
            NativePriceFeed::TokenPrice {
                token: String::from(WETH),
            },
            0,
        );
        (dex.clone(), Balancer::new(dex, Arc::new(FakeSource::new()), prices))
    }

    fn txs(values: Vec<Value>) -> Vec<Transaction_Type> {
        values
            .into_iter()
            .map(|v| serde_json::from_value(v).unwrap())
            .collect()
    }

    #[test]
    fn test_share_query_references_duplicate_once() {
        let txs = dedup_transactions(txs(vec![
            tx_json("0xaaa", 100, "0xuser"),
            tx_json("0xaaa", 100, "0xuser"),
            tx_json("0xbbb", 101, "0xuser"),
        ]));
        let query = share_query(&txs);

        assert_eq!(txs.len(), 2);
        assert_eq!(query.matches("t0xaaa: poolShares(").count(), 1);
        assert_eq!(query.matches("poolShares(").count(), 2);
        assert!(query.contains("block: { number: 101 }"));
    }

    #[test]
    fn test_pool_tokens() {
        let pool: Balancer_Pool_Type = serde_json::from_value(pool_json()).unwrap();
        let tokens = pool_tokens(&pool).unwrap();

        assert_eq!(tokens[0].weight, "0.8".parse::<BigDecimal>().unwrap());
        assert_eq!(tokens[0].price_usd, BigDecimal::from(400));
        assert_eq!(tokens[1].weight, "0.2".parse::<BigDecimal>().unwrap());
        assert_eq!(tokens[1].price_usd, BigDecimal::zero());
    }

    #[tokio::test]
    async fn test_position_page() {
        let dex = FakeSource::new()
            .on("transactions(", json!({"transactions": [
                tx_json("0xbbb", 101, "0xuser"),
                tx_json("0xaaa", 100, "0xuser"),
                tx_json("0xaaa", 100, "0xuser"),
                tx_json("0xccc", 102, "0xother"),
            ]}))
            .on("poolShares(", json!({
                "t0xaaa": [share_json("0xuser", "3")],
                "t0xbbb": [share_json("0xuser", "4")],
                "t0xccc": [],
            }))
            .on("tokenPrice(", json!({
                "b100": {"price": "380"},
                "b101": {"price": "381"},
            }));

        let (dex, balancer) = adapter(dex);
        let page = balancer.position_page(100, 150).await.unwrap();

        assert_eq!(page.raw_count, 4);
        assert_eq!(page.records.len(), 2);
        assert_eq!(page.records[0].id, "0xaaa");
        assert_eq!(page.records[0].block, 100);
        assert_eq!(page.records[0].liquidity_balance, BigDecimal::from(3));
        assert_eq!(page.records[0].liquidity_total_supply, BigDecimal::from(100));
        assert_eq!(
            page.records[0].tx_cost_native,
            "0.002".parse::<BigDecimal>().unwrap()
        );
        assert_eq!(page.records[1].native_asset_price_usd, Some(BigDecimal::from(381)));
        assert_eq!(dex.sent_matching("poolShares(").len(), 1);
    }

    #[tokio::test]
    async fn test_zero_weight_pool_skips_only_its_join() {
        let mut broken = share_json("0xuser", "4");
        broken["poolId"]["totalWeight"] = json!("0");
        let dex = FakeSource::new()
            .on("transactions(", json!({"transactions": [
                tx_json("0xaaa", 100, "0xuser"),
                tx_json("0xbbb", 101, "0xuser"),
            ]}))
            .on("poolShares(", json!({
                "t0xaaa": [share_json("0xuser", "3")],
                "t0xbbb": [broken],
            }))
            .on("tokenPrice(", json!({"b100": {"price": "380"}}));

        let (_, balancer) = adapter(dex);
        let page = balancer.position_page(100, 150).await.unwrap();

        assert_eq!(page.raw_count, 2);
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.records[0].id, "0xaaa");
    }

    #[tokio::test]
    async fn test_zero_weight_pool_skipped_in_pools_page() {
        let mut broken = pool_json();
        broken["id"] = json!("0xbroken");
        broken["totalWeight"] = json!("0");
        let dex = FakeSource::new()
            .on("pools(first", json!({
                "_meta": {"block": {"number": 200}},
                "pools": [broken, pool_json()],
            }))
            .on("tokenPrice(", json!({"b200": {"price": "390"}}));

        let (_, balancer) = adapter(dex);
        let page = balancer
            .pools_page(0, 10, BigDecimal::from(1000))
            .await
            .unwrap();

        assert_eq!(page.raw_count, 2);
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.records[0].id, "0xbpool");
        assert_eq!(page.records[0].as_of_block, 200);
        assert_eq!(page.records[0].native_asset_price_usd, Some(BigDecimal::from(390)));
    }

    #[tokio::test]
    async fn test_staked_stream_not_supported() {
        let (_, balancer) = adapter(FakeSource::new());
        let err = balancer
            .fetch_staked_position_batches(0, 100, None)
            .try_collect::<Vec<_>>()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotSupported(_)));
    }
}
