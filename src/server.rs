use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::broker::Broker;
use crate::config::Config;
use crate::error::JudgeError;
use crate::schema::{Status, Submission, Verdict};

#[derive(Clone)]
pub struct AppState {
    pub broker: Broker,
    pub config: Arc<Config>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/judge", post(submit))
        .route("/api/v1/health", get(health))
        .route("/api/v1/health/redis", get(health_redis))
        .route("/api/v1/health/detail", get(health_detail))
        .route("/api/v1/health/restart", post(health_restart))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Submit-and-wait. Enqueues the submission, then blocks on the per-task
/// results list until a worker publishes the verdict or `max_latency`
/// elapses. Semantic outcomes, including SYSTEM_ERROR verdicts, are 200;
/// non-2xx is reserved for schema rejections and transport failure.
async fn submit(State(state): State<AppState>, Json(submission): Json<Submission>) -> Response {
    if let Err(message) = submission.validate() {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "detail": message })),
        )
            .into_response();
    }

    match rendezvous(&state, submission).await {
        Ok(verdict) => (StatusCode::OK, Json(verdict)).into_response(),
        Err(e) => {
            tracing::error!("judge rendezvous failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "detail": e.user_message() })),
            )
                .into_response()
        }
    }
}

async fn rendezvous(state: &AppState, submission: Submission) -> Result<Verdict, JudgeError> {
    let broker = &state.broker;
    let config = &state.config;
    let task_id = submission.task_id.clone();
    let total = submission.test_cases.len();

    let payload = serde_json::to_vec(&submission)?;
    let task_key = broker.keys.task(&task_id);

    broker
        .hset(
            &task_key,
            &[
                ("status", Status::Pending.as_str().to_string()),
                ("submitted_at", now_secs().to_string()),
                ("data", String::from_utf8_lossy(&payload).to_string()),
            ],
        )
        .await?;
    broker.expire(&task_key, config.result_expiry).await?;

    broker.incr(&broker.keys.submitted()).await?;
    broker.push(&broker.keys.submissions(), &payload).await?;
    tracing::debug!(task_id, "submission enqueued");

    let results_key = broker.keys.results(&task_id);
    match broker.blocking_pop(&results_key, config.max_latency).await? {
        Some(raw) => {
            broker.delete(&[task_key, results_key]).await?;
            let verdict: Verdict = serde_json::from_slice(&raw)?;
            Ok(verdict)
        }
        None => Ok(timeout_verdict(broker, &task_key, task_id, total).await?),
    }
}

/// Diagnose a rendezvous timeout by inspecting what is left of the task
/// hash, so operators can tell a backlogged queue from a lost task.
async fn timeout_verdict(
    broker: &Broker,
    task_key: &str,
    task_id: String,
    total: usize,
) -> Result<Verdict, JudgeError> {
    let fields = broker.hget_fields(task_key, &["status"]).await?;
    let status = fields
        .first()
        .and_then(|f| f.as_ref())
        .map(|raw| String::from_utf8_lossy(raw).to_string());

    let diagnostic = match status.as_deref() {
        Some("pending") => "task is still pending; the judge queue may be backlogged".to_string(),
        None => "task not found or expired".to_string(),
        Some(other) => format!("task is in state '{other}'"),
    };
    tracing::warn!(task_id, diagnostic, "rendezvous timed out");

    Ok(Verdict::system_error(
        task_id,
        format!("Judging timed out: {diagnostic}"),
        total,
    ))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy" }))
}

async fn health_redis(State(state): State<AppState>) -> Json<serde_json::Value> {
    match state.broker.ping().await {
        Ok(()) => Json(json!({ "status": "healthy", "redis": "connected" })),
        Err(e) => Json(json!({ "status": "unhealthy", "redis": e.to_string() })),
    }
}

async fn health_detail(State(state): State<AppState>) -> Response {
    match collect_detail(&state).await {
        Ok(detail) => Json(detail).into_response(),
        Err(e) => {
            tracing::error!("health detail failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "detail": e.user_message() })),
            )
                .into_response()
        }
    }
}

async fn collect_detail(state: &AppState) -> Result<serde_json::Value, JudgeError> {
    let broker = &state.broker;

    let submissions_length = broker.length(&broker.keys.submissions()).await?;
    let tasks_length = broker.scan_all(&broker.keys.task_pattern(), 1000).await?.len();
    let results_length = broker
        .scan_all(&broker.keys.results_pattern(), 1000)
        .await?
        .len();

    let submitted = read_counter(broker, &broker.keys.submitted()).await?;
    let fetched = read_counter(broker, &broker.keys.fetched()).await?;
    let processed = read_counter(broker, &broker.keys.processed()).await?;

    Ok(json!({
        "submissions_length": submissions_length,
        "tasks_length": tasks_length,
        "results_length": results_length,
        "submitted_tasks": submitted,
        "fetched_tasks": fetched,
        "processed_tasks": processed,
        "backlog": submitted - processed,
    }))
}

async fn read_counter(broker: &Broker, key: &str) -> Result<i64, JudgeError> {
    Ok(broker
        .get(key)
        .await?
        .and_then(|raw| String::from_utf8_lossy(&raw).parse().ok())
        .unwrap_or(0))
}

/// Raise the rolling-restart flag. The supervisor's monitor loop picks it up
/// on its next tick and rolls the pool half at a time.
async fn health_restart(State(state): State<AppState>) -> Response {
    match state
        .broker
        .set(&state.broker.keys.restart(), "True")
        .await
    {
        Ok(()) => Json(json!({ "status": "restart scheduled" })).into_response(),
        Err(e) => {
            tracing::error!("failed to raise restart flag: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "detail": e.user_message() })),
            )
                .into_response()
        }
    }
}

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
