use crate::types::Stake_Position_Snapshot_Type;

pub const SNAPS_QUERY: &str = r#"{
    snaps: liquidityPositionSnapshots(first: 1000, orderBy: block, orderDirection: asc, where: {block_gte: $MIN_BLOCK, block_lt: $MAX_BLOCK}) {
        id
        timestamp
        block
        user {
            id
        }
        pair {
            id
            token0 {
                id
                symbol
                name
            }
            token1 {
                id
                symbol
                name
            }
        }
        reserve0
        reserve1
        reserveUSD
        totalSupply: liquidityTokenTotalSupply
        liquidityTokenBalance
    }
}"#;

pub const SNAP_IDS_QUERY: &str = r#"{
    ids: liquidityPositionSnapshots(first: 1000, orderBy: block, orderDirection: asc, where: {block_gte: $MIN_BLOCK, block_lt: $MAX_BLOCK}) {
        id
    }
}"#;

pub const SNAP_BY_ID_QUERY: &str = r#"{
    snap: liquidityPositionSnapshot(id: "$ID") {
        id
        timestamp
        block
        user {
            id
        }
        pair {
            id
            token0 {
                id
                symbol
                name
            }
            token1 {
                id
                symbol
                name
            }
        }
        reserve0
        reserve1
        reserveUSD
        totalSupply: liquidityTokenTotalSupply
        liquidityTokenBalance
    }
}"#;

/// LP-token transfers. A zero `from` is a mint, a zero `to` a burn, anything
/// else a plain transfer of LP tokens.
pub const LP_TRANSFERS_QUERY: &str = r#"{
    transactions(first: 1000, orderBy: blockNumber, orderDirection: asc, where: {blockNumber_gte: $MIN_BLOCK, blockNumber_lt: $MAX_BLOCK}) {
        id
        blockNumber
        from
        to
        gasUsed
        gasPrice
    }
}"#;

pub const PAIRS_QUERY: &str = r#"{
    _meta {
        block {
            number
        }
    }
    pairs(first: $FIRST, skip: $SKIP, orderBy: reserveUSD, orderDirection: desc, where: {reserveUSD_gt: $MIN_LIQUIDITY}) {
        id
        totalSupply
        reserve0
        reserve1
        reserveUSD
        token0 {
            id
            symbol
            name
        }
        token1 {
            id
            symbol
            name
        }
    }
}"#;

/// One aliased pair lookup per stake, at the stake's block. Alias `s{i}`
/// points back at `stakes[i]`.
pub fn stake_pairs_query(stakes: &[Stake_Position_Snapshot_Type]) -> String {
    let mut query = String::from("{");
    for (i, stake) in stakes.iter().enumerate() {
        query.push_str(&format!(
            r#"
    s{i}: pair(id: "{pool}", block: {{ number: {block} }}) {{
        id
        totalSupply
        reserve0
        reserve1
        reserveUSD
        token0 {{
            id
            symbol
            name
        }}
        token1 {{
            id
            symbol
            name
        }}
    }}"#,
            i = i,
            pool = stake.pool,
            block = stake.block_number
        ));
    }
    query.push_str("\n}");
    query
}
