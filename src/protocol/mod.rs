use std::{fmt::Debug, future::Future, sync::Arc};

use bigdecimal::BigDecimal;
use futures::{
    stream::{self, BoxStream},
    StreamExt, TryStreamExt,
};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::{
    configuration::Config,
    error::Error,
    handler::prices::{NativePriceFeed, PriceEnricher},
    model::{Exchange, Pool, SharePosition, StakingService, YieldReward},
    provider::{SourceClient, Subgraph},
    types::Meta,
};

pub use self::{
    balancer::Balancer,
    merge::{merge_observations, Observation, Origin},
    uniswap::Uniswap,
};

mod balancer;
mod balancer_queries;
mod merge;
mod rewards;
mod uniswap;
mod uniswap_queries;

/// Upstream hard cap on entities returned for one top-level field.
pub const QUERY_LIMIT: usize = 1000;

/// Lazy, finite sequence of pages. Pages may be empty after merging; the
/// sequence itself ends once the upstream is exhausted.
pub type Batches<'a, T> = BoxStream<'a, Result<Vec<T>, Error>>;

/// Capability set of one DEX protocol family.
pub trait ProtocolAdapter: Send + Sync + Debug {
    fn exchange(&self) -> Exchange;

    fn fetch_position_batches(
        &self,
        from_block: i64,
        batch_size: i64,
    ) -> Batches<'_, SharePosition>;

    fn fetch_staked_position_batches(
        &self,
        from_block: i64,
        batch_size: i64,
        staking_service: Option<StakingService>,
    ) -> Batches<'_, SharePosition>;

    fn fetch_pools(
        &self,
        batch_size: i64,
        min_liquidity: BigDecimal,
    ) -> Batches<'_, Pool>;

    fn fetch_yield_rewards(
        &self,
        from_block: i64,
        batch_size: i64,
    ) -> Batches<'_, YieldReward>;
}

/// One upstream page after mapping. `raw_count` is what the upstream
/// returned before merging and dropping, and drives termination.
#[derive(Debug)]
pub struct Page<T> {
    pub raw_count: usize,
    pub records: Vec<T>,
}

impl<T> Page<T> {
    pub fn empty() -> Self {
        Page {
            raw_count: 0,
            records: vec![],
        }
    }
}

/// Pages half-open block windows `[from, from + batch_size)`.
///
/// Without a known head the sequence ends at the first window with no raw
/// records. With `head` (the upstream's last indexed block) windows are
/// clamped to it, empty windows below it are stepped over, and the sequence
/// ends once the head is reached.
pub fn block_windows<'a, T, F, Fut>(
    from_block: i64,
    batch_size: i64,
    head: Option<i64>,
    fetch: F,
) -> Batches<'a, T>
where
    T: Send + 'a,
    F: Fn(i64, i64) -> Fut + Send + 'a,
    Fut: Future<Output = Result<Page<T>, Error>> + Send + 'a,
{
    let batch_size = batch_size.max(1);

    stream::try_unfold(Some(from_block), move |state| {
        let window = state.and_then(|from| {
            let mut to = from + batch_size;
            if let Some(head) = head {
                if from >= head {
                    return None;
                }
                to = to.min(head);
            }
            Some((from, to, fetch(from, to)))
        });

        async move {
            let Some((from, to, page)) = window else {
                return Ok(None);
            };
            let page = page.await?;
            let reached_head = head.map_or(true, |head| to >= head);
            let next = if page.raw_count == 0 && reached_head {
                None
            } else {
                Some(to)
            };
            tracing::debug!(
                "window [{}, {}): {} raw records",
                from,
                to,
                page.raw_count
            );
            Ok(Some((page.records, next)))
        }
    })
    .filter_map(|page| async move {
        match page {
            Ok(records) if records.is_empty() => None,
            other => Some(other),
        }
    })
    .boxed()
}

/// Same as [`block_windows`] bounded by the lowest indexed head among
/// `sources`, so a window is never committed while one of the feeds that
/// contribute to it still lags behind.
pub fn head_bounded_windows<'a, T, F, Fut>(
    sources: Vec<&'a dyn SourceClient>,
    from_block: i64,
    batch_size: i64,
    fetch: F,
) -> Batches<'a, T>
where
    T: Send + 'a,
    F: Fn(i64, i64) -> Fut + Send + 'a,
    Fut: Future<Output = Result<Page<T>, Error>> + Send + 'a,
{
    let mut fetch = Some(fetch);

    stream::once(async move {
        let mut head: Option<i64> = None;
        for source in sources {
            let block = indexed_head(source).await?;
            head = Some(head.map_or(block, |head| head.min(block)));
        }
        Ok::<Option<i64>, Error>(head)
    })
    .map_ok(move |head| match fetch.take() {
        Some(fetch) => block_windows(from_block, batch_size, head, fetch),
        None => stream::empty().boxed(),
    })
    .try_flatten()
    .boxed()
}

/// Pages by offset. Only used for full-state enumerations that are
/// overwritten wholesale, where a record shifted across a page boundary by a
/// concurrent upstream insert is picked up on the next run.
pub fn offset_pages<'a, T, F, Fut>(batch_size: i64, fetch: F) -> Batches<'a, T>
where
    T: Send + 'a,
    F: Fn(i64, i64) -> Fut + Send + 'a,
    Fut: Future<Output = Result<Page<T>, Error>> + Send + 'a,
{
    let batch_size = batch_size.max(1);

    stream::try_unfold(Some(0_i64), move |state| {
        let page = state.map(|skip| (skip, fetch(skip, batch_size)));

        async move {
            let Some((skip, page)) = page else {
                return Ok(None);
            };
            let page = page.await?;
            if page.raw_count == 0 {
                return Ok(None);
            }
            let next = if (page.raw_count as i64) < batch_size {
                None
            } else {
                Some(skip + batch_size)
            };
            Ok(Some((page.records, next)))
        }
    })
    .boxed()
}

/// Deserializes one top-level field of a query result.
pub fn field<T: DeserializeOwned>(data: &Value, name: &str) -> Result<T, Error> {
    let value = data
        .get(name)
        .ok_or_else(|| Error::FieldNotExist(name.to_owned()))?;
    Ok(serde_json::from_value(value.clone())?)
}

/// Fails when a raw page hit the upstream's entity cap, which would silently
/// truncate the window.
pub fn check_query_limit(field: &str, records: usize) -> Result<(), Error> {
    if records >= QUERY_LIMIT {
        return Err(Error::PageTooLarge {
            records,
            limit: QUERY_LIMIT,
        });
    }
    tracing::trace!("{}: {} records", field, records);
    Ok(())
}

/// Last block the upstream has indexed.
pub async fn indexed_head(source: &dyn SourceClient) -> Result<i64, Error> {
    let data = source.query("{ _meta { block { number } } }", &[]).await?;
    let meta: Meta = field(&data, "_meta")?;
    Ok(meta.block.number)
}

pub fn build_adapter(
    config: &Config,
    exchange: Exchange,
) -> Result<Arc<dyn ProtocolAdapter>, Error> {
    let dex: Arc<dyn SourceClient> =
        Arc::new(Subgraph::new(config, config.dex_subgraph(exchange))?);
    let rewards: Arc<dyn SourceClient> =
        Arc::new(Subgraph::new(config, &config.rewards_subgraph)?);

    let feed = match exchange {
        Exchange::UNI_V2 | Exchange::SUSHI => NativePriceFeed::Bundle,
        Exchange::BALANCER => NativePriceFeed::TokenPrice {
            token: String::from(balancer::WETH),
        },
    };
    let prices = PriceEnricher::from_config(config, exchange, dex.clone(), feed)?;

    let adapter: Arc<dyn ProtocolAdapter> = match exchange {
        Exchange::UNI_V2 | Exchange::SUSHI => {
            let txs = match &config.uniswap_tx_subgraph {
                Some(subgraph) if exchange == Exchange::UNI_V2 => {
                    let client: Arc<dyn SourceClient> =
                        Arc::new(Subgraph::new(config, subgraph)?);
                    Some(client)
                },
                _ => None,
            };
            Arc::new(Uniswap::new(exchange, dex, rewards, txs, prices))
        },
        Exchange::BALANCER => Arc::new(Balancer::new(dex, rewards, prices)),
    };

    Ok(adapter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::testing::FakeSource;
    use serde_json::json;
    use std::sync::Mutex;

    fn pages(
        counts: Vec<usize>,
    ) -> (Arc<Mutex<Vec<(i64, i64)>>>, impl Fn(i64, i64) -> futures::future::Ready<Result<Page<i64>, Error>>)
    {
        let calls = Arc::new(Mutex::new(vec![]));
        let seen = calls.clone();
        let fetch = move |from: i64, to: i64| {
            let mut calls = seen.lock().unwrap();
            let count = counts.get(calls.len()).copied().unwrap_or(0);
            calls.push((from, to));
            futures::future::ready(Ok(Page {
                raw_count: count,
                records: (0..count as i64).map(|i| from + i).collect(),
            }))
        };
        (calls, fetch)
    }

    #[tokio::test]
    async fn test_block_windows_end_on_empty_page() {
        let (calls, fetch) = pages(vec![40, 0]);
        let batches: Vec<Vec<i64>> =
            block_windows(100, 50, None, fetch).try_collect().await.unwrap();

        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 40);
        assert_eq!(*calls.lock().unwrap(), vec![(100, 150), (150, 200)]);
    }

    #[tokio::test]
    async fn test_block_windows_step_over_quiet_range_below_head() {
        let (calls, fetch) = pages(vec![2, 0, 3]);
        let batches: Vec<Vec<i64>> = block_windows(0, 10, Some(25), fetch)
            .try_collect()
            .await
            .unwrap();

        assert_eq!(batches.len(), 2);
        assert_eq!(*calls.lock().unwrap(), vec![(0, 10), (10, 20), (20, 25)]);
    }

    #[tokio::test]
    async fn test_block_windows_at_head() {
        let (calls, fetch) = pages(vec![5]);
        let batches: Vec<Vec<i64>> = block_windows(30, 10, Some(30), fetch)
            .try_collect()
            .await
            .unwrap();

        assert!(batches.is_empty());
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_head_is_lowest_among_sources() {
        let dex = FakeSource::new().on("_meta", json!({"_meta": {"block": {"number": 40}}}));
        let rewards = FakeSource::new().on("_meta", json!({"_meta": {"block": {"number": "25"}}}));
        let (calls, fetch) = pages(vec![1, 1, 1]);
        let sources: Vec<&dyn SourceClient> = vec![&dex, &rewards];

        let batches: Vec<Vec<i64>> =
            head_bounded_windows(sources, 0, 10, fetch)
                .try_collect()
                .await
                .unwrap();

        assert_eq!(batches.len(), 3);
        assert_eq!(*calls.lock().unwrap(), vec![(0, 10), (10, 20), (20, 25)]);
    }

    #[tokio::test]
    async fn test_offset_pages_stop_on_short_page() {
        let (calls, fetch) = pages(vec![10, 4]);
        let batches: Vec<Vec<i64>> =
            offset_pages(10, fetch).try_collect().await.unwrap();

        assert_eq!(batches.len(), 2);
        assert_eq!(*calls.lock().unwrap(), vec![(0, 10), (10, 10)]);
    }

    #[test]
    fn test_query_limit() {
        assert!(check_query_limit("snaps", 999).is_ok());
        assert!(matches!(
            check_query_limit("snaps", 1000),
            Err(Error::PageTooLarge { records: 1000, .. })
        ));
    }
}
