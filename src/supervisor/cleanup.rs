use std::time::{SystemTime, UNIX_EPOCH};

use tokio_util::sync::CancellationToken;

use crate::broker::Broker;
use crate::config::Config;
use crate::error::JudgeError;

const SCAN_BATCH: usize = 1000;

/// Expired-state eviction loop: task hashes older than the result expiry
/// horizon, then result lists whose task hash no longer exists. The TTL on
/// each hash already handles the common case; this sweep catches entries
/// whose TTL was lost to a partial write.
pub async fn run(broker: Broker, config: Config, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(config.cleanup_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }

        match sweep(&broker, &config).await {
            Ok((expired, orphaned)) if expired > 0 || orphaned > 0 => {
                tracing::info!(expired, orphaned, "cleanup removed stale broker entries");
            }
            Ok(_) => {}
            Err(e) => tracing::error!("cleanup sweep failed: {e}"),
        }
    }

    tracing::debug!("cleanup loop stopped");
}

async fn sweep(broker: &Broker, config: &Config) -> Result<(usize, usize), JudgeError> {
    let expired = evict_expired_tasks(broker, config).await?;
    let orphaned = evict_orphaned_results(broker).await?;
    Ok((expired, orphaned))
}

async fn evict_expired_tasks(broker: &Broker, config: &Config) -> Result<usize, JudgeError> {
    let now = now_secs();
    let horizon = config.result_expiry.as_secs_f64();
    let mut deleted = 0;
    let mut cursor = 0;

    loop {
        let (next, keys) = broker
            .scan(cursor, &broker.keys.task_pattern(), SCAN_BATCH)
            .await?;

        let mut to_delete = Vec::new();
        for key in keys {
            let fields = broker.hget_fields(&key, &["submitted_at"]).await?;
            let submitted_at = fields
                .first()
                .and_then(|f| f.as_ref())
                .and_then(|raw| String::from_utf8_lossy(raw).parse::<f64>().ok())
                .unwrap_or(0.0);
            if now - submitted_at > horizon {
                to_delete.push(key);
            }
        }
        deleted += to_delete.len();
        broker.delete(&to_delete).await?;

        if next == 0 {
            break;
        }
        cursor = next;
    }

    Ok(deleted)
}

async fn evict_orphaned_results(broker: &Broker) -> Result<usize, JudgeError> {
    let mut deleted = 0;
    let mut cursor = 0;

    loop {
        let (next, keys) = broker
            .scan(cursor, &broker.keys.results_pattern(), SCAN_BATCH)
            .await?;

        let mut to_delete = Vec::new();
        for key in keys {
            let Some(task_id) = broker.keys.result_task_id_of(&key) else {
                continue;
            };
            if !broker.exists(&broker.keys.task(&task_id)).await? {
                to_delete.push(key);
            }
        }
        deleted += to_delete.len();
        broker.delete(&to_delete).await?;

        if next == 0 {
            break;
        }
        cursor = next;
    }

    Ok(deleted)
}

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
