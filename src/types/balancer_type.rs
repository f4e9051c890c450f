use bigdecimal::BigDecimal;
use serde::Deserialize;

use crate::{helpers::de_i64, types::IdRef};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction_Type {
    pub tx: String,
    #[serde(deserialize_with = "de_i64")]
    pub block: i64,
    #[serde(deserialize_with = "de_i64")]
    pub timestamp: i64,
    pub gas_used: BigDecimal,
    pub gas_price: BigDecimal,
    pub pool_address: IdRef,
    pub user_address: IdRef,
    pub event: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pool_Share_Type {
    pub user_address: IdRef,
    pub balance: BigDecimal,
    pub pool_id: Balancer_Pool_Type,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Balancer_Pool_Type {
    pub id: String,
    pub total_weight: BigDecimal,
    pub total_shares: BigDecimal,
    pub liquidity: BigDecimal,
    pub tokens: Vec<Balancer_Token_Type>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Balancer_Token_Type {
    pub symbol: String,
    pub name: Option<String>,
    pub address: String,
    pub denorm_weight: BigDecimal,
    pub balance: BigDecimal,
}
