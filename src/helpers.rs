use bigdecimal::BigDecimal;
use serde::{Deserialize, Deserializer};

/// Replaces every `$NAME` placeholder in `query` with its value.
///
/// Longer names are substituted first so `$MIN` never eats the prefix of
/// `$MIN_BLOCK`.
pub fn formatter(mut query: String, params: &[(&str, String)]) -> String {
    let mut params: Vec<&(&str, String)> = params.iter().collect();
    params.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

    for (name, value) in params {
        query = query.replace(name, value);
    }
    query
}

pub fn parse_tuple_string(data: String) -> Vec<String> {
    if data.is_empty() {
        return vec![];
    }

    let str = &data[1..];
    let splited = str.split(",(");
    let mut items: Vec<String> = Vec::new();

    for c in splited {
        if let Some(index) = c.find(')') {
            let tuple_data = &c[0..index];
            items.push(tuple_data.to_owned());
        }
    }

    items
}

/// Native-asset cost of a transaction: `gas_used * gas_price * 1e-18`.
pub fn tx_cost_native(gas_used: &BigDecimal, gas_price: &BigDecimal) -> BigDecimal {
    gas_used * gas_price * BigDecimal::new(1.into(), 18)
}

/// Subgraphs render `Int` fields as JSON numbers and `BigInt` fields as
/// strings. Accept both.
pub fn de_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum IntOrString {
        Int(i64),
        Str(String),
    }

    match IntOrString::deserialize(deserializer)? {
        IntOrString::Int(value) => Ok(value),
        IntOrString::Str(value) => {
            value.parse().map_err(serde::de::Error::custom)
        },
    }
}

/// Decimals cross the sink boundary as plain base-10 strings.
pub mod decimal {
    use std::collections::BTreeMap;

    use bigdecimal::BigDecimal;
    use serde::{ser::SerializeMap, Serializer};

    pub fn serialize<S>(
        value: &BigDecimal,
        serializer: S,
    ) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.normalized().to_plain_string())
    }

    pub fn serialize_option<S>(
        value: &Option<BigDecimal>,
        serializer: S,
    ) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(value) => serialize(value, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn serialize_map<K, S>(
        value: &BTreeMap<K, BigDecimal>,
        serializer: S,
    ) -> Result<S::Ok, S::Error>
    where
        K: serde::Serialize,
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(value.len()))?;
        for (key, price) in value {
            map.serialize_entry(key, &price.normalized().to_plain_string())?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn test_formatter_prefers_longest_name() {
        let query = String::from("{ a(where: {b_gte: $MIN_BLOCK, c: $MIN}) }");
        let params = [("$MIN", String::from("7")), ("$MIN_BLOCK", String::from("100"))];

        assert_eq!(
            formatter(query, &params),
            "{ a(where: {b_gte: 100, c: 7}) }"
        );
    }

    #[test]
    fn test_formatter_replaces_every_occurrence() {
        let query = String::from("$ID $ID");
        assert_eq!(formatter(query, &[("$ID", String::from("x"))]), "x x");
    }

    #[test]
    fn test_parse_tuple_string() {
        let items = parse_tuple_string(String::from("(UNI_V2,0xa,1),(SUSHI,0xb,2)"));
        assert_eq!(items, vec!["UNI_V2,0xa,1", "SUSHI,0xb,2"]);
        assert!(parse_tuple_string(String::new()).is_empty());
    }

    #[test]
    fn test_tx_cost_native() {
        let gas_used = BigDecimal::from(21_000);
        let gas_price = BigDecimal::from(50_000_000_000u64);
        let cost = tx_cost_native(&gas_used, &gas_price);
        assert_eq!(cost, BigDecimal::from_str("0.00105").unwrap());
    }

    #[test]
    fn test_de_i64_accepts_numbers_and_strings() {
        #[derive(Deserialize)]
        struct Row {
            #[serde(deserialize_with = "de_i64")]
            block: i64,
        }

        let a: Row = serde_json::from_str(r#"{"block": 10}"#).unwrap();
        let b: Row = serde_json::from_str(r#"{"block": "11"}"#).unwrap();
        assert_eq!(a.block, 10);
        assert_eq!(b.block, 11);
    }
}
