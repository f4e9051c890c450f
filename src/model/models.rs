//! Consolidated domain models
//!
//! Everything the pipeline persists, organized by domain sections. Field
//! names are rendered in camelCase and decimals as plain strings at the sink
//! boundary.

use std::{collections::BTreeMap, fmt, io, str::FromStr};

use bigdecimal::BigDecimal;
use serde::Serialize;

use crate::helpers::decimal;

// =============================================================================
// EXCHANGES & SERVICES
// =============================================================================

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize,
)]
pub enum Exchange {
    UNI_V2,
    SUSHI,
    BALANCER,
}

impl Exchange {
    pub fn as_str(&self) -> &'static str {
        match self {
            Exchange::UNI_V2 => "UNI_V2",
            Exchange::SUSHI => "SUSHI",
            Exchange::BALANCER => "BALANCER",
        }
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Exchange {
    type Err = io::Error;

    fn from_str(value: &str) -> Result<Exchange, Self::Err> {
        match value {
            "UNI_V2" => Ok(Exchange::UNI_V2),
            "SUSHI" => Ok(Exchange::SUSHI),
            "BALANCER" => Ok(Exchange::BALANCER),
            _ => Err(io::Error::other("Unknown exchange type")),
        }
    }
}

/// Yield-staking contracts whose deposits show up on the staking
/// side-channel.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize,
)]
pub enum StakingService {
    UNI_V2,
    SUSHI,
    INDEX,
    PANCAKE,
}

impl StakingService {
    pub fn as_str(&self) -> &'static str {
        match self {
            StakingService::UNI_V2 => "UNI_V2",
            StakingService::SUSHI => "SUSHI",
            StakingService::INDEX => "INDEX",
            StakingService::PANCAKE => "PANCAKE",
        }
    }
}

impl fmt::Display for StakingService {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for StakingService {
    type Err = io::Error;

    fn from_str(value: &str) -> Result<StakingService, Self::Err> {
        match value {
            "UNI_V2" => Ok(StakingService::UNI_V2),
            "SUSHI" => Ok(StakingService::SUSHI),
            "INDEX" => Ok(StakingService::INDEX),
            "PANCAKE" => Ok(StakingService::PANCAKE),
            _ => Err(io::Error::other("Staking service not supported")),
        }
    }
}

// =============================================================================
// SYNC STREAMS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Snaps,
    StakedSnaps,
    Pools,
    Yields,
}

impl EntityKind {
    /// Key under which the stream's watermark is persisted.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Snaps => "snaps",
            EntityKind::StakedSnaps => "stakedSnaps",
            EntityKind::Pools => "pools",
            EntityKind::Yields => "yields",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = io::Error;

    fn from_str(value: &str) -> Result<EntityKind, Self::Err> {
        match value {
            "snaps" => Ok(EntityKind::Snaps),
            "staked_snaps" | "stakedSnaps" => Ok(EntityKind::StakedSnaps),
            "pools" => Ok(EntityKind::Pools),
            "yields" => Ok(EntityKind::Yields),
            _ => Err(io::Error::other("Unknown entity type")),
        }
    }
}

/// How the committed batch's highest block becomes the next watermark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatermarkPolicy {
    MaxBlock,
    /// Keeps one block of overlap so a boundary block re-indexed upstream is
    /// fetched again on the next run.
    MaxBlockMinusOne,
}

impl WatermarkPolicy {
    pub fn next(&self, current: i64, highest_block: i64) -> i64 {
        let candidate = match self {
            WatermarkPolicy::MaxBlock => highest_block,
            WatermarkPolicy::MaxBlockMinusOne => highest_block - 1,
        };
        candidate.max(current)
    }
}

impl FromStr for WatermarkPolicy {
    type Err = io::Error;

    fn from_str(value: &str) -> Result<WatermarkPolicy, Self::Err> {
        match value {
            "max_block" => Ok(WatermarkPolicy::MaxBlock),
            "max_block_minus_one" => Ok(WatermarkPolicy::MaxBlockMinusOne),
            _ => Err(io::Error::other("Watermark policy not supported")),
        }
    }
}

// =============================================================================
// POOL DOMAIN
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrencyRef {
    pub symbol: String,
    pub display_name: Option<String>,
    pub contract_address: String,
    pub platform: String,
}

impl CurrencyRef {
    pub fn ethereum(
        symbol: String,
        display_name: Option<String>,
        contract_address: String,
    ) -> CurrencyRef {
        CurrencyRef {
            symbol,
            display_name,
            contract_address,
            platform: String::from("ethereum"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolToken {
    pub currency: CurrencyRef,
    #[serde(serialize_with = "decimal::serialize")]
    pub weight: BigDecimal,
    #[serde(serialize_with = "decimal::serialize")]
    pub reserve: BigDecimal,
    #[serde(serialize_with = "decimal::serialize")]
    pub price_usd: BigDecimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pool {
    pub id: String,
    pub protocol: Exchange,
    #[serde(serialize_with = "decimal::serialize")]
    pub liquidity_total_supply: BigDecimal,
    pub tokens: Vec<PoolToken>,
    pub as_of_block: i64,
    #[serde(serialize_with = "decimal::serialize_option")]
    pub native_asset_price_usd: Option<BigDecimal>,
    #[serde(serialize_with = "decimal::serialize_map")]
    pub yield_token_prices: BTreeMap<StakingService, BigDecimal>,
}

// =============================================================================
// USER DOMAIN
// =============================================================================

/// A user's pool-share balance and the pool's full state as of one block.
/// Appended, never updated.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SharePosition {
    pub id: String,
    pub protocol: Exchange,
    pub user_address: String,
    pub pool_id: String,
    #[serde(serialize_with = "decimal::serialize")]
    pub liquidity_balance: BigDecimal,
    #[serde(serialize_with = "decimal::serialize")]
    pub liquidity_total_supply: BigDecimal,
    pub tokens: Vec<PoolToken>,
    pub block: i64,
    pub timestamp: i64,
    pub tx_hash: Option<String>,
    #[serde(serialize_with = "decimal::serialize")]
    pub tx_cost_native: BigDecimal,
    #[serde(serialize_with = "decimal::serialize_option")]
    pub native_asset_price_usd: Option<BigDecimal>,
    pub staking_service: Option<StakingService>,
    #[serde(serialize_with = "decimal::serialize_option")]
    pub yield_token_price_usd: Option<BigDecimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YieldReward {
    pub id: String,
    pub protocol: Exchange,
    pub user_address: String,
    pub pool_id: Option<String>,
    #[serde(serialize_with = "decimal::serialize")]
    pub amount: BigDecimal,
    pub block: i64,
    pub timestamp: i64,
    pub tx_hash: String,
    pub staking_service: StakingService,
}

// =============================================================================
// PERSISTENCE
// =============================================================================

/// Anything written through the sink under its own path.
pub trait Document: Serialize + Send + Sync {
    fn path(&self) -> String;
}

/// Documents that belong to a block-ordered, watermarked stream.
pub trait BlockRecord: Document {
    fn block(&self) -> i64;
}

impl Document for SharePosition {
    fn path(&self) -> String {
        format!(
            "users/{}/{}/snaps/{}/{}",
            self.user_address, self.protocol, self.pool_id, self.id
        )
    }
}

impl BlockRecord for SharePosition {
    fn block(&self) -> i64 {
        self.block
    }
}

impl Document for YieldReward {
    fn path(&self) -> String {
        format!(
            "users/{}/{}/yields/{}",
            self.user_address, self.protocol, self.id
        )
    }
}

impl BlockRecord for YieldReward {
    fn block(&self) -> i64 {
        self.block
    }
}

impl Document for Pool {
    fn path(&self) -> String {
        format!("poolSnaps/{}/{}", self.protocol, self.id)
    }
}
