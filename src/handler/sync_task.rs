use std::{future::Future, time::Duration};

use tokio::time;
use tracing::{error, info};

use crate::{
    configuration::{AppState, State},
    error::Error,
    model::{EntityKind, Exchange},
    provider::{start_sync, RunOptions, SyncReport},
};

/// Re-runs one stream every `RUN_INTERVAL_SEC`. Only a fatal error ends the
/// loop; anything else is logged and retried on the next tick.
pub async fn sync_task(
    app_state: AppState<State>,
    exchange: Exchange,
    kind: EntityKind,
    options: RunOptions,
) -> Result<(), Error> {
    let interval = Duration::from_secs(app_state.config.run_interval);

    sync_loop(interval, || {
        start_sync(app_state.clone(), exchange, kind, options.clone())
    })
    .await
}

pub async fn sync_loop<F, Fut>(interval: Duration, mut run: F) -> Result<(), Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<SyncReport, Error>>,
{
    let mut interval = time::interval(interval);

    loop {
        interval.tick().await;

        match run().await {
            Ok(report) if report.lagged => {
                info!("Upstream behind, waiting for the next tick");
            },
            Ok(_) => {},
            Err(e) if e.is_fatal() => {
                error!("Sync stopped: {}", e);
                return Err(e);
            },
            Err(e) => {
                error!("Task error {}", e);
            },
        }
    }
}
