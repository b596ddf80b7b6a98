use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

use crate::api::latency::{LatencySnapshot, LatencyStats};
use crate::config::{EVAL_JOB_KIND, SYNC_JOB_KIND};
use crate::error::AppError;
use crate::jobs::queue::{Enqueued, JobQueue};

#[derive(Clone)]
pub struct ApiState {
    pub pool: sqlx::SqlitePool,
    pub sync_queue: JobQueue,
    pub eval_queue: JobQueue,
    pub sync_latency: Arc<LatencyStats>,
    pub eval_latency: Arc<LatencyStats>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/markets/sync", post(trigger_sync))
        .route("/markets/evaluate", post(trigger_evaluation))
        .route("/health", get(get_health))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct TriggerResponse {
    pub message: String,
    pub deduplicated: bool,
    pub timestamp_ms: i64,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub market_count: i64,
    pub markets_needing_evaluation: i64,
    pub sync_jobs_pending: i64,
    pub eval_jobs_pending: i64,
    pub sync_pass: LatencySnapshot,
    pub evaluation_cycle: LatencySnapshot,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn trigger_sync(State(state): State<ApiState>) -> Result<Json<TriggerResponse>, AppError> {
    let enqueued = state
        .sync_queue
        .enqueue(SYNC_JOB_KIND, serde_json::json!({}))
        .await?;
    Ok(Json(ack("Market sync job queued", enqueued)))
}

async fn trigger_evaluation(
    State(state): State<ApiState>,
) -> Result<Json<TriggerResponse>, AppError> {
    let enqueued = state
        .eval_queue
        .enqueue(EVAL_JOB_KIND, serde_json::json!({}))
        .await?;
    Ok(Json(ack("Market evaluation job queued", enqueued)))
}

async fn get_health(State(state): State<ApiState>) -> Result<Json<HealthResponse>, AppError> {
    let market_count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM markets")
        .fetch_one(&state.pool)
        .await?;
    let markets_needing_evaluation = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM markets WHERE needs_evaluation = 1 OR title IS NULL",
    )
    .fetch_one(&state.pool)
    .await?;

    Ok(Json(HealthResponse {
        market_count,
        markets_needing_evaluation,
        sync_jobs_pending: state.sync_queue.pending_count().await?,
        eval_jobs_pending: state.eval_queue.pending_count().await?,
        sync_pass: state.sync_latency.snapshot(),
        evaluation_cycle: state.eval_latency.snapshot(),
    }))
}

fn ack(message: &str, enqueued: Enqueued) -> TriggerResponse {
    TriggerResponse {
        message: message.to_string(),
        deduplicated: matches!(enqueued, Enqueued::Deduplicated),
        timestamp_ms: now_ms(),
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
