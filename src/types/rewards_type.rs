use bigdecimal::BigDecimal;
use serde::Deserialize;

use crate::helpers::de_i64;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stake_Position_Snapshot_Type {
    pub id: String,
    pub user: String,
    pub pool: String,
    pub liquidity_token_balance: BigDecimal,
    #[serde(deserialize_with = "de_i64")]
    pub block_number: i64,
    #[serde(deserialize_with = "de_i64")]
    pub block_timestamp: i64,
    pub tx_hash: String,
    pub tx_gas_used: BigDecimal,
    pub tx_gas_price: BigDecimal,
    pub staking_service: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reward_Type {
    pub id: String,
    pub user: String,
    pub pool: Option<String>,
    pub amount: BigDecimal,
    #[serde(deserialize_with = "de_i64")]
    pub block_number: i64,
    #[serde(deserialize_with = "de_i64")]
    pub block_timestamp: i64,
    pub tx_hash: String,
    pub staking_service: String,
}
