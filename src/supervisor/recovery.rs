use std::time::{SystemTime, UNIX_EPOCH};

use tokio_util::sync::CancellationToken;

use crate::broker::Broker;
use crate::config::Config;
use crate::error::JudgeError;
use crate::schema::Verdict;

/// A PENDING task older than this with an empty submissions list lost its
/// enqueue (or its worker died between pop and RUNNING).
const PENDING_GRACE_SECS: f64 = 5.0;

const SCAN_BATCH: usize = 1000;

/// Stuck-task recovery loop. Tasks are requeued from their hash `data`
/// field, so a lost submission is judged again rather than dropped; judging
/// is at-least-once, and the waiter's single BLPOP consumes exactly one
/// verdict.
pub async fn run(broker: Broker, config: Config, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(config.recover_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }

        if let Err(e) = sweep(&broker, &config).await {
            tracing::error!("recovery sweep failed: {e}");
        }
    }

    tracing::debug!("recovery loop stopped");
}

async fn sweep(broker: &Broker, config: &Config) -> Result<(), JudgeError> {
    // Work sitting in the submissions list will be served normally; only an
    // empty list can mean tasks were dropped on the floor.
    if broker.length(&broker.keys.submissions()).await? != 0 {
        return Ok(());
    }

    let keys = broker
        .scan_all(&broker.keys.task_pattern(), SCAN_BATCH)
        .await?;
    let now = now_secs();
    let mut recovered = 0;

    for key in keys {
        let fields = broker
            .hget_fields(&key, &["status", "submitted_at", "running_at", "data"])
            .await?;
        let status = decode(&fields, 0);
        let submitted_at = decode(&fields, 1).and_then(|s| s.parse::<f64>().ok());
        let running_at = decode(&fields, 2).and_then(|s| s.parse::<f64>().ok());
        let data = fields.get(3).cloned().flatten();

        // Missing timestamps read as "not stale": a half-written hash is
        // left for the next sweep rather than guessed at.
        let stale_pending = status.as_deref() == Some("pending")
            && submitted_at.is_some_and(|t| now - t > PENDING_GRACE_SECS);
        let stale_running = status.as_deref() == Some("running")
            && running_at
                .is_some_and(|t| now - t > config.max_task_execution_time.as_secs_f64());

        if !(stale_pending || stale_running) {
            continue;
        }

        let Some(task_id) = broker.keys.task_id_of(&key) else {
            continue;
        };
        tracing::warn!(task_id, status = ?status, "detected lost task");
        recover_task(broker, &task_id, data).await?;
        recovered += 1;
    }

    if recovered > 0 {
        tracing::info!(recovered, "recovered lost or hanging tasks");
    }
    Ok(())
}

async fn recover_task(
    broker: &Broker,
    task_id: &str,
    data: Option<Vec<u8>>,
) -> Result<(), JudgeError> {
    match data {
        Some(payload) => {
            broker.push(&broker.keys.submissions(), &payload).await?;
            tracing::info!(task_id, "task re-queued");
        }
        None => {
            // Without the payload there is nothing to re-run; fail the task
            // so its waiter unblocks.
            let verdict = Verdict::system_error(task_id, "Task lost and cannot be recovered", 0);
            broker
                .push(
                    &broker.keys.results(task_id),
                    &serde_json::to_vec(&verdict)?,
                )
                .await?;
            tracing::warn!(task_id, "task unrecoverable, failed with system error");
        }
    }
    Ok(())
}

fn decode(fields: &[Option<Vec<u8>>], index: usize) -> Option<String> {
    fields
        .get(index)?
        .as_ref()
        .map(|raw| String::from_utf8_lossy(raw).to_string())
}

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
