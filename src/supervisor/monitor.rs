use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::broker::Broker;
use crate::config::Config;
use crate::error::JudgeError;
use crate::supervisor::WorkerPool;

/// Worker liveness loop. Every `monitor_interval` it restarts dead workers,
/// kills hung judging children, logs an aggregate status line, and carries
/// out a rolling restart when an operator has raised the broker flag.
pub async fn run(
    pool: Arc<Mutex<WorkerPool>>,
    broker: Broker,
    config: Config,
    shutdown: CancellationToken,
) {
    let mut interval = tokio::time::interval(config.monitor_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }

        let status = {
            let mut pool = pool.lock().await;
            pool.check_workers(&config)
        };
        tracing::info!(
            total = status.total,
            idle = status.total - status.busy,
            busy = status.busy,
            failed = status.failed,
            hanging = status.hanging,
            "worker status"
        );

        if let Err(e) = maybe_rolling_restart(&pool, &broker).await {
            tracing::error!("rolling restart failed: {e}");
        }
    }

    tracing::debug!("monitor loop stopped");
}

async fn maybe_rolling_restart(
    pool: &Arc<Mutex<WorkerPool>>,
    broker: &Broker,
) -> Result<(), JudgeError> {
    let flag = broker.get(&broker.keys.restart()).await?;
    if flag.as_deref() != Some(b"True".as_slice()) {
        return Ok(());
    }
    tracing::info!("restart flag raised, rolling the worker pool");
    let mut pool = pool.lock().await;
    pool.rolling_restart(broker).await
}
