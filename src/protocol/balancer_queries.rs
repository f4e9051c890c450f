use crate::types::Transaction_Type;

pub const TRANSACTIONS_QUERY: &str = r#"{
    transactions(first: 1000, orderBy: block, orderDirection: asc, where: {block_gte: $MIN_BLOCK, block_lt: $MAX_BLOCK, event_in: ["join", "exit"]}) {
        tx
        block
        timestamp
        gasUsed
        gasPrice
        poolAddress {
            id
        }
        userAddress {
            id
        }
        event
    }
}"#;

pub const POOLS_QUERY: &str = r#"{
    _meta {
        block {
            number
        }
    }
    pools(first: $FIRST, skip: $SKIP, orderBy: liquidity, orderDirection: desc, where: {liquidity_gt: $MIN_LIQUIDITY}) {
        id
        totalWeight
        totalShares
        liquidity
        tokens {
            symbol
            name
            address
            denormWeight
            balance
        }
    }
}"#;

pub fn share_alias(tx: &str) -> String {
    format!("t{}", tx)
}

/// One aliased `poolShares` lookup per transaction at its block. Callers
/// pass transactions already deduplicated by id, so aliases are unique.
pub fn share_query(txs: &[Transaction_Type]) -> String {
    let mut query = String::from("{");
    for tx in txs {
        query.push_str(&format!(
            r#"
    {alias}: poolShares(first: 2, where: {{userAddress: "{user}", poolId: "{pool}"}}, block: {{ number: {block} }}) {{
        userAddress {{
            id
        }}
        balance
        poolId {{
            id
            totalWeight
            totalShares
            liquidity
            tokens {{
                symbol
                name
                address
                denormWeight
                balance
            }}
        }}
    }}"#,
            alias = share_alias(&tx.tx),
            user = tx.user_address.id,
            pool = tx.pool_address.id,
            block = tx.block
        ));
    }
    query.push_str("\n}");
    query
}
