use std::pin::pin;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;

use crate::broker::Broker;
use crate::config::Config;
use crate::error::JudgeError;
use crate::judge;
use crate::schema::{Status, Submission, Verdict};

/// How long one blocking pop waits before the loop re-checks for shutdown.
const POP_TIMEOUT: Duration = Duration::from_secs(1);

/// Pause after an unexpected loop error so a broken broker connection does
/// not spin the worker at full speed.
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Entry point for a worker process. Builds its own single-threaded
/// cooperative scheduler: one OS process, one runtime, so the sandbox
/// boundary stays per-process.
pub fn run(worker_id: usize) -> i32 {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!(worker_id, "failed to build worker runtime: {e}");
            return 1;
        }
    };

    match runtime.block_on(worker_main(worker_id)) {
        Ok(()) => 0,
        Err(e) => {
            tracing::error!(worker_id, "worker failed: {e}");
            1
        }
    }
}

async fn worker_main(worker_id: usize) -> Result<(), JudgeError> {
    let config = Config::from_env();
    let broker = Broker::connect(&config).await?;

    let shutdown = CancellationToken::new();
    spawn_signal_listener(shutdown.clone())?;

    tracing::info!(worker_id, "worker started");

    let submissions = broker.keys.submissions();
    loop {
        if shutdown.is_cancelled() {
            break;
        }

        let popped = tokio::select! {
            res = broker.blocking_pop(&submissions, POP_TIMEOUT) => res,
            _ = shutdown.cancelled() => break,
        };

        match popped {
            Ok(None) => continue,
            Ok(Some(payload)) => {
                if let Err(e) = handle_payload(&broker, &config, &payload, &shutdown).await {
                    tracing::error!(worker_id, "error processing task: {e}");
                    tokio::time::sleep(ERROR_BACKOFF).await;
                }
            }
            Err(e) => {
                tracing::error!(worker_id, "dequeue error: {e}");
                tokio::time::sleep(ERROR_BACKOFF).await;
            }
        }
    }

    tracing::info!(worker_id, "worker shut down cleanly");
    Ok(())
}

async fn handle_payload(
    broker: &Broker,
    config: &Config,
    payload: &[u8],
    shutdown: &CancellationToken,
) -> Result<(), JudgeError> {
    broker.incr(&broker.keys.fetched()).await?;
    let submission: Submission = serde_json::from_slice(payload)?;
    let task_id = submission.task_id.clone();
    let total = submission.test_cases.len();

    if let Err(e) = process_task(broker, config, &submission, shutdown).await {
        tracing::error!(task_id, "task processing failed: {e}");
        // The waiter must still be unblocked (invariant: at most one verdict
        // per task, but never zero while the waiter is within its timeout).
        let fallback = Verdict::system_error(task_id.as_str(), e.user_message(), total);
        if let Err(push_err) = publish_verdict(broker, &fallback).await {
            tracing::error!(task_id, "failed to publish error verdict: {push_err}");
        }
    }
    Ok(())
}

async fn process_task(
    broker: &Broker,
    config: &Config,
    submission: &Submission,
    shutdown: &CancellationToken,
) -> Result<(), JudgeError> {
    let task_key = broker.keys.task(&submission.task_id);
    broker
        .hset(
            &task_key,
            &[
                ("status", Status::Running.as_str().to_string()),
                ("running_at", now_secs().to_string()),
            ],
        )
        .await?;
    broker.expire(&task_key, config.result_expiry).await?;

    let mut judge_fut = pin!(judge::judge(submission, config));
    let verdict = tokio::select! {
        verdict = &mut judge_fut => verdict,
        _ = shutdown.cancelled() => {
            // Let the in-flight task finish within the grace window, then
            // cut it loose so the waiter is not stranded.
            match tokio::time::timeout(config.task_completion_timeout, &mut judge_fut).await {
                Ok(verdict) => verdict,
                Err(_) => {
                    tracing::warn!(
                        task_id = submission.task_id,
                        "task cancelled during worker shutdown"
                    );
                    Verdict::system_error(
                        submission.task_id.as_str(),
                        "judging cancelled by worker shutdown",
                        submission.test_cases.len(),
                    )
                }
            }
        }
    };

    publish_verdict(broker, &verdict).await
}

async fn publish_verdict(broker: &Broker, verdict: &Verdict) -> Result<(), JudgeError> {
    let payload = serde_json::to_vec(verdict)?;
    broker
        .push(&broker.keys.results(&verdict.task_id), &payload)
        .await?;
    broker.incr(&broker.keys.processed()).await?;
    Ok(())
}

fn spawn_signal_listener(shutdown: CancellationToken) -> Result<(), JudgeError> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => {}
            _ = sigint.recv() => {}
        }
        tracing::info!("shutdown signal received");
        shutdown.cancel();
    });
    Ok(())
}

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
