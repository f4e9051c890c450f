use std::{collections::HashMap, sync::Arc};

use bigdecimal::{BigDecimal, Zero};
use tracing::{debug, error, info};

use crate::{
    error::Error,
    handler::prices::{reserve_price, PriceEnricher},
    helpers::tx_cost_native,
    model::{
        CurrencyRef, Exchange, Pool, PoolToken, SharePosition, StakingService,
        YieldReward,
    },
    provider::SourceClient,
    types::{
        IdRef, LP_Transfer_Type, Meta, Pair_State_Type, Position_Snapshot_Type,
        Stake_Position_Snapshot_Type, Token_Type,
    },
};

use super::{
    check_query_limit, field, head_bounded_windows, merge_observations,
    offset_pages, rewards, uniswap_queries::*, Batches, Observation, Origin,
    Page, ProtocolAdapter,
};

/// Reference tokens priced by hand before on-chain price discovery settled.
const PRICE_OVERRIDES: [(&str, i64); 3] = [
    ("0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48", 1), // USDC
    ("0x6b175474e89094c44da98b954eedeac495271d0f", 1), // DAI
    ("0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2", 203), // WETH
];

const PRICE_DISCOVERY_START_TIMESTAMP: i64 = 1589747086;

/// Constant-product pairs with a 50/50 weight model. Serves every
/// Uniswap v2 fork; the exchange only selects the subgraph.
#[derive(Debug)]
pub struct Uniswap {
    exchange: Exchange,
    dex: Arc<dyn SourceClient>,
    rewards: Arc<dyn SourceClient>,
    txs: Option<Arc<dyn SourceClient>>,
    prices: PriceEnricher,
}

type TransferIndex = HashMap<String, Vec<LP_Transfer_Type>>;

impl Uniswap {
    pub fn new(
        exchange: Exchange,
        dex: Arc<dyn SourceClient>,
        rewards: Arc<dyn SourceClient>,
        txs: Option<Arc<dyn SourceClient>>,
        prices: PriceEnricher,
    ) -> Self {
        Self {
            exchange,
            dex,
            rewards,
            txs,
            prices,
        }
    }

    fn window_params(from_block: i64, to_block: i64) -> [(&'static str, String); 2] {
        [
            ("$MIN_BLOCK", from_block.to_string()),
            ("$MAX_BLOCK", to_block.to_string()),
        ]
    }

    async fn position_page(
        &self,
        from_block: i64,
        to_block: i64,
    ) -> Result<Page<SharePosition>, Error> {
        let snaps = self.fetch_snapshots(from_block, to_block).await?;
        let transfers = self.fetch_transfers(from_block, to_block).await?;
        let stakes = rewards::fetch_stakes(
            self.rewards.as_ref(),
            self.exchange,
            from_block,
            to_block,
            None,
        )
        .await?;

        let raw_count = snaps.len() + stakes.len();
        let mut observations = Vec::with_capacity(raw_count);

        for snap in snaps {
            if let Some(position) = self.process_snap(snap, transfers.as_ref()) {
                observations.push(Observation::new(Origin::Position, position));
            }
        }
        for position in self.staked_positions(stakes).await? {
            observations.push(Observation::new(Origin::Staking, position));
        }

        let mut records = merge_observations(observations);
        self.enrich(&mut records).await?;

        Ok(Page { raw_count, records })
    }

    async fn staked_page(
        &self,
        from_block: i64,
        to_block: i64,
        service: Option<StakingService>,
    ) -> Result<Page<SharePosition>, Error> {
        let stakes = rewards::fetch_stakes(
            self.rewards.as_ref(),
            self.exchange,
            from_block,
            to_block,
            service,
        )
        .await?;

        let raw_count = stakes.len();
        let observations = self
            .staked_positions(stakes)
            .await?
            .into_iter()
            .map(|position| Observation::new(Origin::Staking, position))
            .collect();

        let mut records = merge_observations(observations);
        self.enrich(&mut records).await?;

        Ok(Page { raw_count, records })
    }

    async fn enrich(&self, records: &mut [SharePosition]) -> Result<(), Error> {
        if records.is_empty() {
            return Ok(());
        }
        self.prices.populate_reference_prices(records).await?;
        self.prices.populate_yield_token_prices(records).await?;
        Ok(())
    }

    async fn fetch_snapshots(
        &self,
        from_block: i64,
        to_block: i64,
    ) -> Result<Vec<Position_Snapshot_Type>, Error> {
        let params = Self::window_params(from_block, to_block);

        let snaps: Vec<Position_Snapshot_Type> =
            match self.dex.query(SNAPS_QUERY, &params).await {
                Ok(data) => field(&data, "snaps")?,
                Err(Error::MissingEntity(e)) => {
                    info!(
                        "{}: {}, fetching window [{}, {}) one snapshot at a time",
                        self.exchange, e, from_block, to_block
                    );
                    self.fetch_snapshots_one_by_one(&params).await?
                },
                Err(e) => return Err(e),
            };

        check_query_limit("liquidityPositionSnapshots", snaps.len())?;
        Ok(snaps)
    }

    async fn fetch_snapshots_one_by_one(
        &self,
        params: &[(&str, String)],
    ) -> Result<Vec<Position_Snapshot_Type>, Error> {
        let data = self.dex.query(SNAP_IDS_QUERY, params).await?;
        let ids: Vec<IdRef> = field(&data, "ids")?;
        let mut snaps = Vec::with_capacity(ids.len());

        for id in ids {
            let params = [("$ID", id.id.clone())];
            match self.dex.query(SNAP_BY_ID_QUERY, &params).await {
                Ok(data) => {
                    if let Some(snap) = field::<Option<Position_Snapshot_Type>>(&data, "snap")? {
                        snaps.push(snap);
                    }
                },
                Err(Error::MissingEntity(e)) => {
                    error!("{}: skipping snapshot {}: {}", self.exchange, id.id, e);
                },
                Err(e) => return Err(e),
            }
        }

        Ok(snaps)
    }

    async fn fetch_transfers(
        &self,
        from_block: i64,
        to_block: i64,
    ) -> Result<Option<TransferIndex>, Error> {
        let Some(txs) = &self.txs else {
            return Ok(None);
        };

        let params = Self::window_params(from_block, to_block);
        let data = txs.query(LP_TRANSFERS_QUERY, &params).await?;
        let transfers: Vec<LP_Transfer_Type> = field(&data, "transactions")?;
        check_query_limit("transactions", transfers.len())?;

        let mut index: TransferIndex = HashMap::new();
        for transfer in transfers {
            index
                .entry(format!("{}{}", transfer.from, transfer.block_number))
                .or_default()
                .push(transfer.clone());
            index
                .entry(format!("{}{}", transfer.to, transfer.block_number))
                .or_default()
                .push(transfer);
        }

        Ok(Some(index))
    }

    fn process_snap(
        &self,
        snap: Position_Snapshot_Type,
        transfers: Option<&TransferIndex>,
    ) -> Option<SharePosition> {
        let Some(user) = snap.user else {
            error!("{}: snapshot {} has no user, skipping", self.exchange, snap.id);
            return None;
        };

        let tokens = pair_tokens(
            snap.timestamp,
            [
                (&snap.pair.token0, &snap.reserve0),
                (&snap.pair.token1, &snap.reserve1),
            ],
            &snap.reserve_usd,
            &snap.id,
        );

        let (tx_hash, tx_cost) = match transfers {
            None => (None, BigDecimal::zero()),
            Some(index) => match_transfer(index, &user.id, snap.block),
        };

        Some(SharePosition {
            id: snap.id,
            protocol: self.exchange,
            user_address: user.id,
            pool_id: snap.pair.id,
            liquidity_balance: snap.liquidity_token_balance,
            liquidity_total_supply: snap.total_supply,
            tokens,
            block: snap.block,
            timestamp: snap.timestamp,
            tx_hash,
            tx_cost_native: tx_cost,
            native_asset_price_usd: None,
            staking_service: None,
            yield_token_price_usd: None,
        })
    }

    /// Resolves each stake against the pair state at the stake's block.
    async fn staked_positions(
        &self,
        stakes: Vec<Stake_Position_Snapshot_Type>,
    ) -> Result<Vec<SharePosition>, Error> {
        if stakes.is_empty() {
            return Ok(vec![]);
        }

        let data = self.dex.query(&stake_pairs_query(&stakes), &[]).await?;
        let mut positions = Vec::with_capacity(stakes.len());

        for (i, stake) in stakes.into_iter().enumerate() {
            let Some(pair) =
                field::<Option<Pair_State_Type>>(&data, &format!("s{}", i))?
            else {
                error!(
                    "{}: pair {} missing at block {}, skipping stake {}",
                    self.exchange, stake.pool, stake.block_number, stake.id
                );
                continue;
            };
            positions.push(self.build_staked_position(stake, pair));
        }

        Ok(positions)
    }

    fn build_staked_position(
        &self,
        stake: Stake_Position_Snapshot_Type,
        pair: Pair_State_Type,
    ) -> SharePosition {
        let tokens = pair_tokens(
            stake.block_timestamp,
            [(&pair.token0, &pair.reserve0), (&pair.token1, &pair.reserve1)],
            &pair.reserve_usd,
            &stake.id,
        );
        let staking_service = rewards::stake_service(&stake);
        let tx_cost = tx_cost_native(&stake.tx_gas_used, &stake.tx_gas_price);

        SharePosition {
            id: stake.id,
            protocol: self.exchange,
            user_address: stake.user,
            pool_id: pair.id,
            liquidity_balance: stake.liquidity_token_balance,
            liquidity_total_supply: pair.total_supply,
            tokens,
            block: stake.block_number,
            timestamp: stake.block_timestamp,
            tx_hash: Some(stake.tx_hash),
            tx_cost_native: tx_cost,
            native_asset_price_usd: None,
            staking_service,
            yield_token_price_usd: None,
        }
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
        let data = self.dex.query(PAIRS_QUERY, &params).await?;
        let meta: Meta = field(&data, "_meta")?;
        let pairs: Vec<Pair_State_Type> = field(&data, "pairs")?;

        let raw_count = pairs.len();
        if pairs.is_empty() {
            return Ok(Page::empty());
        }

        let as_of_block = meta.block.number;
        let (native_price, yield_prices) =
            self.prices.current_prices(as_of_block).await?;
        let current = i64::MAX;

        let records = pairs
            .into_iter()
            .map(|pair| Pool {
                tokens: pair_tokens(
                    current,
                    [(&pair.token0, &pair.reserve0), (&pair.token1, &pair.reserve1)],
                    &pair.reserve_usd,
                    &pair.id,
                ),
                id: pair.id,
                protocol: self.exchange,
                liquidity_total_supply: pair.total_supply,
                as_of_block,
                native_asset_price_usd: native_price.clone(),
                yield_token_prices: yield_prices.clone(),
            })
            .collect();

        Ok(Page { raw_count, records })
    }
}

impl ProtocolAdapter for Uniswap {
    fn exchange(&self) -> Exchange {
        self.exchange
    }

    fn fetch_position_batches(
        &self,
        from_block: i64,
        batch_size: i64,
    ) -> Batches<'_, SharePosition> {
        let mut sources = vec![self.dex.as_ref(), self.rewards.as_ref()];
        if let Some(txs) = &self.txs {
            sources.push(txs.as_ref());
        }
        head_bounded_windows(sources, from_block, batch_size, move |from, to| {
            self.position_page(from, to)
        })
    }

    fn fetch_staked_position_batches(
        &self,
        from_block: i64,
        batch_size: i64,
        staking_service: Option<StakingService>,
    ) -> Batches<'_, SharePosition> {
        let sources = vec![self.rewards.as_ref(), self.dex.as_ref()];
        head_bounded_windows(sources, from_block, batch_size, move |from, to| {
            self.staked_page(from, to, staking_service)
        })
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
        let exchange = self.exchange;
        let source = self.rewards.as_ref();
        head_bounded_windows(vec![source], from_block, batch_size, move |from, to| {
            rewards::fetch_rewards_page(source, exchange, from, to)
        })
    }
}

/// Takes `tx_hash` and cost from the LP transfer the user made in the same
/// block, the first one when several match.
fn match_transfer(
    index: &TransferIndex,
    user: &str,
    block: i64,
) -> (Option<String>, BigDecimal) {
    let matches = index
        .get(&format!("{}{}", user, block))
        .map(Vec::as_slice)
        .unwrap_or_default();

    match matches {
        [] => {
            debug!("No user txs in a block. User: {}, block: {}.", user, block);
            (Some(String::new()), BigDecimal::zero())
        },
        [tx, rest @ ..] => {
            if !rest.is_empty() {
                debug!(
                    "Multiple user txs in a block, choosing the first one. User: {}, block: {}.",
                    user, block
                );
            }
            (Some(tx.id.clone()), tx_cost_native(&tx.gas_used, &tx.gas_price))
        },
    }
}

fn token_price_usd(
    timestamp: i64,
    token: &Token_Type,
    reserve: &BigDecimal,
    reserve_usd: &BigDecimal,
    context: &str,
) -> BigDecimal {
    if timestamp < PRICE_DISCOVERY_START_TIMESTAMP {
        if let Some((_, price)) =
            PRICE_OVERRIDES.iter().find(|(address, _)| *address == token.id)
        {
            return BigDecimal::from(*price);
        }
    }
    let half = reserve_usd / BigDecimal::from(2);
    reserve_price(&half, reserve, &token.symbol, context)
}

fn pair_tokens(
    timestamp: i64,
    sides: [(&Token_Type, &BigDecimal); 2],
    reserve_usd: &BigDecimal,
    context: &str,
) -> Vec<PoolToken> {
    sides
        .into_iter()
        .map(|(token, reserve)| PoolToken {
            currency: CurrencyRef::ethereum(
                token.symbol.clone(),
                token.name.clone(),
                token.id.clone(),
            ),
            weight: half_weight(),
            reserve: reserve.clone(),
            price_usd: token_price_usd(timestamp, token, reserve, reserve_usd, context),
        })
        .collect()
}

fn half_weight() -> BigDecimal {
    BigDecimal::new(5.into(), 1)
}
