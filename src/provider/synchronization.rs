use std::sync::Arc;

use bigdecimal::BigDecimal;
use futures::StreamExt;
use tracing::{error, info, warn};

use crate::{
    configuration::{AppState, State},
    dao::{get_watermark, set_watermark, upload, Sink},
    error::Error,
    model::{
        BlockRecord, Document, EntityKind, Exchange, StakingService,
        WatermarkPolicy,
    },
    protocol::{build_adapter, Batches, ProtocolAdapter},
};

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub batch_size: i64,
    pub min_liquidity: Option<BigDecimal>,
    pub staking_service: Option<StakingService>,
}

impl RunOptions {
    pub fn new(batch_size: i64) -> Self {
        Self {
            batch_size,
            min_liquidity: None,
            staking_service: None,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct SyncReport {
    pub batches: usize,
    pub records: usize,
    pub watermark: Option<i64>,
    /// The run stopped early because the upstream had not indexed the
    /// requested range yet.
    pub lagged: bool,
}

/// Drives one `(exchange, entity kind)` stream. One page is in flight at a
/// time; each page is validated, committed, and only then moves the
/// watermark.
#[derive(Debug)]
pub struct Synchronization {
    adapter: Arc<dyn ProtocolAdapter>,
    sink: Arc<dyn Sink>,
    kind: EntityKind,
    policy: WatermarkPolicy,
    max_records_per_page: usize,
    watermark: i64,
}

impl Synchronization {
    pub async fn load(
        adapter: Arc<dyn ProtocolAdapter>,
        sink: Arc<dyn Sink>,
        kind: EntityKind,
        policy: WatermarkPolicy,
        max_records_per_page: usize,
    ) -> Result<Self, Error> {
        let watermark = match kind {
            EntityKind::Pools => 0,
            kind => get_watermark(sink.as_ref(), adapter.exchange(), kind).await?,
        };

        Ok(Synchronization {
            adapter,
            sink,
            kind,
            policy,
            max_records_per_page,
            watermark,
        })
    }

    pub fn exchange(&self) -> Exchange {
        self.adapter.exchange()
    }

    pub fn watermark(&self) -> i64 {
        self.watermark
    }

    pub async fn run(&mut self, options: &RunOptions) -> Result<SyncReport, Error> {
        info!("{} {} update initiated at block {}", self.exchange(), self.kind, self.watermark);

        let adapter = self.adapter.clone();
        let from = self.watermark;
        let batch_size = options.batch_size;

        match self.kind {
            EntityKind::Snaps => {
                self.drive(adapter.fetch_position_batches(from, batch_size)).await
            },
            EntityKind::StakedSnaps => {
                let batches = adapter.fetch_staked_position_batches(
                    from,
                    batch_size,
                    options.staking_service,
                );
                self.drive(batches).await
            },
            EntityKind::Yields => {
                self.drive(adapter.fetch_yield_rewards(from, batch_size)).await
            },
            EntityKind::Pools => {
                let min_liquidity = options.min_liquidity.clone().ok_or_else(|| {
                    Error::FieldNotExist(String::from("min_liquidity"))
                })?;
                self.drive_pools(adapter.fetch_pools(batch_size, min_liquidity)).await
            },
        }
    }

    async fn drive<T: BlockRecord>(
        &mut self,
        mut batches: Batches<'_, T>,
    ) -> Result<SyncReport, Error> {
        let mut report = SyncReport::default();
        let mut prev_highest: Option<i64> = None;

        while let Some(batch) = batches.next().await {
            let batch = match batch {
                Ok(batch) => batch,
                Err(e) if e.is_indexing_lag() => {
                    warn!("{} {}: {}", self.exchange(), self.kind, e);
                    report.lagged = true;
                    break;
                },
                Err(e) => return Err(e),
            };

            let Some((lowest, highest)) = block_bounds(&batch) else {
                continue;
            };
            self.check_page_size(batch.len())?;

            info!("Lowest block: {}, highest block: {}", lowest, highest);
            if let Some(prev_highest) = prev_highest {
                if prev_highest > lowest {
                    return Err(Error::OrderingViolation {
                        prev_highest,
                        lowest,
                    });
                }
            }
            prev_highest = Some(highest);

            self.commit(&batch, highest).await?;
            report.batches += 1;
            report.records += batch.len();
        }

        report.watermark = Some(self.watermark);
        Ok(report)
    }

    async fn commit<T: BlockRecord>(
        &mut self,
        batch: &[T],
        highest: i64,
    ) -> Result<(), Error> {
        info!("Uploading {} {}", batch.len(), self.kind);
        upload(self.sink.as_ref(), batch).await?;

        // Another writer may have moved the stored watermark past ours.
        let stored =
            get_watermark(self.sink.as_ref(), self.exchange(), self.kind).await?;
        let watermark = self.policy.next(self.watermark.max(stored), highest);
        set_watermark(self.sink.as_ref(), self.exchange(), self.kind, watermark)
            .await?;
        self.watermark = watermark;
        info!("Updated highest {} block to {}", self.kind, watermark);

        Ok(())
    }

    async fn drive_pools<T: Document>(
        &mut self,
        mut batches: Batches<'_, T>,
    ) -> Result<SyncReport, Error> {
        let mut report = SyncReport::default();

        while let Some(batch) = batches.next().await {
            let batch = batch?;
            if batch.is_empty() {
                continue;
            }
            self.check_page_size(batch.len())?;

            info!("Uploading {} pools", batch.len());
            upload(self.sink.as_ref(), &batch).await?;
            report.batches += 1;
            report.records += batch.len();
        }

        Ok(report)
    }

    fn check_page_size(&self, records: usize) -> Result<(), Error> {
        if records > self.max_records_per_page {
            return Err(Error::PageTooLarge {
                records,
                limit: self.max_records_per_page,
            });
        }
        Ok(())
    }
}

fn block_bounds<T: BlockRecord>(batch: &[T]) -> Option<(i64, i64)> {
    let lowest = batch.iter().map(BlockRecord::block).min()?;
    let highest = batch.iter().map(BlockRecord::block).max()?;
    Some((lowest, highest))
}

/// Runs one stream to completion against the process-wide sink. Fails with
/// `AlreadyRunning` while another run holds the same stream.
pub async fn start_sync(
    app_state: AppState<State>,
    exchange: Exchange,
    kind: EntityKind,
    options: RunOptions,
) -> Result<SyncReport, Error> {
    let guard = app_state.streams.try_acquire(exchange, kind).await?;

    tokio::spawn(async move {
        let _guard = guard;
        let config = &app_state.config;
        let adapter = build_adapter(config, exchange)?;
        let mut sync_manager = Synchronization::load(
            adapter,
            app_state.sink.clone(),
            kind,
            config.watermark_policy,
            config.max_records_per_page,
        )
        .await?;

        match sync_manager.run(&options).await {
            Ok(report) => {
                info!(
                    "{} {} synchronization completed: {} records in {} batches",
                    exchange, kind, report.records, report.batches
                );
                Ok(report)
            },
            Err(e) => {
                error!("{} {} synchronization error {}", exchange, kind, e);
                Err(e)
            },
        }
    })
    .await?
}
