//! Staking snapshots and reward events live in one shared subgraph, filtered
//! by exchange.

use std::str::FromStr;

use tracing::error;

use crate::{
    error::Error,
    model::{Exchange, StakingService, YieldReward},
    provider::SourceClient,
    types::{Reward_Type, Stake_Position_Snapshot_Type},
};

use super::{check_query_limit, field, Page};

const STAKES_QUERY: &str = r#"{
    stakes: stakePositionSnapshots(first: 1000, orderBy: blockNumber, orderDirection: asc, where: {blockNumber_gte: $MIN_BLOCK, blockNumber_lt: $MAX_BLOCK, exchange: "$EXCHANGE"$SERVICE}) {
        id
        user
        pool
        liquidityTokenBalance
        blockNumber
        blockTimestamp
        txHash
        txGasUsed
        txGasPrice
        stakingService
    }
}"#;

const REWARDS_QUERY: &str = r#"{
    rewards(first: 1000, orderBy: blockNumber, orderDirection: asc, where: {blockNumber_gte: $MIN_BLOCK, blockNumber_lt: $MAX_BLOCK, exchange: "$EXCHANGE"}) {
        id
        user
        pool
        amount
        blockNumber
        blockTimestamp
        txHash
        stakingService
    }
}"#;

pub async fn fetch_stakes(
    source: &dyn SourceClient,
    exchange: Exchange,
    from_block: i64,
    to_block: i64,
    service: Option<StakingService>,
) -> Result<Vec<Stake_Position_Snapshot_Type>, Error> {
    let service = service
        .map(|s| format!(", stakingService: \"{}\"", s))
        .unwrap_or_default();
    let params = [
        ("$MIN_BLOCK", from_block.to_string()),
        ("$MAX_BLOCK", to_block.to_string()),
        ("$EXCHANGE", exchange.to_string()),
        ("$SERVICE", service),
    ];

    let data = source.query(STAKES_QUERY, &params).await?;
    let stakes: Vec<Stake_Position_Snapshot_Type> = field(&data, "stakes")?;
    check_query_limit("stakePositionSnapshots", stakes.len())?;

    Ok(stakes)
}

pub fn stake_service(
    stake: &Stake_Position_Snapshot_Type,
) -> Option<StakingService> {
    let service = stake.staking_service.as_deref()?;
    match StakingService::from_str(service) {
        Ok(service) => Some(service),
        Err(e) => {
            error!("stake {}: {}: {}", stake.id, service, e);
            None
        },
    }
}

pub async fn fetch_rewards_page(
    source: &dyn SourceClient,
    exchange: Exchange,
    from_block: i64,
    to_block: i64,
) -> Result<Page<YieldReward>, Error> {
    let params = [
        ("$MIN_BLOCK", from_block.to_string()),
        ("$MAX_BLOCK", to_block.to_string()),
        ("$EXCHANGE", exchange.to_string()),
    ];

    let data = source.query(REWARDS_QUERY, &params).await?;
    let rewards: Vec<Reward_Type> = field(&data, "rewards")?;
    check_query_limit("rewards", rewards.len())?;

    let raw_count = rewards.len();
    let mut records = Vec::with_capacity(raw_count);

    for reward in rewards {
        let staking_service = match StakingService::from_str(&reward.staking_service) {
            Ok(service) => service,
            Err(e) => {
                error!("skipping reward {}: {}", reward.id, e);
                continue;
            },
        };
        records.push(YieldReward {
            id: reward.id,
            protocol: exchange,
            user_address: reward.user,
            pool_id: reward.pool,
            amount: reward.amount,
            block: reward.block_number,
            timestamp: reward.block_timestamp,
            tx_hash: reward.tx_hash,
            staking_service,
        });
    }

    Ok(Page { raw_count, records })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::testing::FakeSource;
    use bigdecimal::BigDecimal;
    use serde_json::json;

    #[tokio::test]
    async fn test_rewards_page() {
        let source = FakeSource::new().on(
            "rewards(",
            json!({"rewards": [
                {
                    "id": "r1", "user": "0xuser", "pool": null, "amount": "12.5",
                    "blockNumber": "101", "blockTimestamp": "1600000000",
                    "txHash": "0xtx", "stakingService": "SUSHI"
                },
                {
                    "id": "r2", "user": "0xuser", "pool": "0xpool", "amount": "1",
                    "blockNumber": "102", "blockTimestamp": "1600000100",
                    "txHash": "0xtx2", "stakingService": "CURVE"
                }
            ]}),
        );

        let page = fetch_rewards_page(&source, Exchange::SUSHI, 100, 150)
            .await
            .unwrap();

        assert_eq!(page.raw_count, 2);
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.records[0].amount, "12.5".parse::<BigDecimal>().unwrap());
        assert_eq!(page.records[0].staking_service, StakingService::SUSHI);
        assert_eq!(page.records[0].block, 101);

        let sent = source.sent();
        assert!(sent[0].contains("blockNumber_gte: 100, blockNumber_lt: 150, exchange: \"SUSHI\""));
    }

    #[tokio::test]
    async fn test_stakes_service_filter() {
        let source = FakeSource::new().on("stakePositionSnapshots(", json!({"stakes": []}));

        fetch_stakes(&source, Exchange::UNI_V2, 0, 10, Some(StakingService::INDEX))
            .await
            .unwrap();
        fetch_stakes(&source, Exchange::UNI_V2, 0, 10, None).await.unwrap();

        let sent = source.sent();
        assert!(sent[0].contains("exchange: \"UNI_V2\", stakingService: \"INDEX\"}"));
        assert!(sent[1].contains("exchange: \"UNI_V2\"}"));
    }
}
