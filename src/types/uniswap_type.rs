use bigdecimal::BigDecimal;
use serde::Deserialize;

use crate::helpers::de_i64;

#[derive(Debug, Clone, Deserialize)]
pub struct IdRef {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Token_Type {
    pub id: String,
    pub symbol: String,
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Pair_Tokens_Type {
    pub id: String,
    pub token0: Token_Type,
    pub token1: Token_Type,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position_Snapshot_Type {
    pub id: String,
    #[serde(deserialize_with = "de_i64")]
    pub timestamp: i64,
    #[serde(deserialize_with = "de_i64")]
    pub block: i64,
    pub user: Option<IdRef>,
    pub pair: Pair_Tokens_Type,
    pub reserve0: BigDecimal,
    pub reserve1: BigDecimal,
    #[serde(rename = "reserveUSD")]
    pub reserve_usd: BigDecimal,
    pub total_supply: BigDecimal,
    pub liquidity_token_balance: BigDecimal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pair_State_Type {
    pub id: String,
    pub total_supply: BigDecimal,
    pub reserve0: BigDecimal,
    pub reserve1: BigDecimal,
    #[serde(rename = "reserveUSD")]
    pub reserve_usd: BigDecimal,
    pub token0: Token_Type,
    pub token1: Token_Type,
}

/// LP-token transfer from the transaction subgraph. A zero `from` is a mint,
/// a zero `to` a burn.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LP_Transfer_Type {
    pub id: String,
    #[serde(deserialize_with = "de_i64")]
    pub block_number: i64,
    pub from: String,
    pub to: String,
    pub gas_used: BigDecimal,
    pub gas_price: BigDecimal,
}
