use bigdecimal::BigDecimal;
use serde::Deserialize;
use serde_json::Value;

use crate::helpers::de_i64;

#[derive(Debug, Deserialize)]
pub struct GraphResponse {
    pub data: Option<Value>,
    pub errors: Option<Vec<GraphError>>,
}

#[derive(Debug, Deserialize)]
pub struct GraphError {
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct Meta {
    pub block: MetaBlock,
}

#[derive(Debug, Deserialize)]
pub struct MetaBlock {
    #[serde(deserialize_with = "de_i64")]
    pub number: i64,
}

#[derive(Debug, Deserialize)]
pub struct PriceValue {
    pub price: Option<BigDecimal>,
}
