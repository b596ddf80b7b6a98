mod config;
mod db;
mod error;
mod eval;
mod indexer;
mod jobs;
mod sync;
mod types;
mod api;

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use crate::api::latency::LatencyStats;
use crate::api::routes::{router, ApiState};
use crate::config::{Config, EVAL_QUEUE, JOB_MAX_ATTEMPTS, SYNC_JOB_KIND, SYNC_QUEUE};
use crate::db::MarketStore;
use crate::error::Result;
use crate::eval::providers::build_provider_chain;
use crate::eval::EvaluationEngine;
use crate::indexer::{EventIndex, IndexerClient};
use crate::jobs::scheduler::{enqueue_trigger, Scheduler};
use crate::jobs::worker::JobHandler;
use crate::jobs::{JobQueue, JobWorker};
use crate::sync::Reconciler;
use crate::types::EvaluationOutcome;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Database setup ---
    let pool = sqlx::SqlitePool::connect(&format!("sqlite:{}?mode=rwc", cfg.db_path)).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database ready at {}", cfg.db_path);

    let store = MarketStore::new(pool.clone());

    // --- Event index + reconciler ---
    let index: Arc<dyn EventIndex> = Arc::new(IndexerClient::new(&cfg)?);
    info!("Event index at {}", cfg.indexer_url);
    let reconciler = Arc::new(Reconciler::new(&cfg, Arc::clone(&index), store.clone())?);

    // --- Evaluation engine ---
    let providers = build_provider_chain(&cfg)?;
    if providers.is_empty() {
        info!("No scoring provider credentials found; heuristic evaluation only");
    } else {
        let names: Vec<&str> = providers.iter().map(|p| p.name()).collect();
        info!("Scoring providers in priority order: {}", names.join(", "));
    }
    let engine = Arc::new(EvaluationEngine::new(store.clone(), providers));

    // --- Queues, workers, scheduler ---
    let sync_queue = JobQueue::new(pool.clone(), SYNC_QUEUE, JOB_MAX_ATTEMPTS);
    let eval_queue = JobQueue::new(pool.clone(), EVAL_QUEUE, JOB_MAX_ATTEMPTS);

    // Rows left 'running' by a previous process would block their kind
    // forever; release them before any worker starts claiming.
    let recovered = sync_queue.recover_stale().await? + eval_queue.recover_stale().await?;
    if recovered > 0 {
        info!("Recovered {recovered} jobs left running by a previous process");
    }

    let sync_latency = Arc::new(LatencyStats::new());
    let eval_latency = Arc::new(LatencyStats::new());

    let sync_worker = JobWorker::new(
        sync_queue.clone(),
        Arc::new(SyncJobHandler {
            reconciler: Arc::clone(&reconciler),
            latency: Arc::clone(&sync_latency),
        }),
    );
    tokio::spawn(async move { sync_worker.run().await });

    let eval_worker = JobWorker::new(
        eval_queue.clone(),
        Arc::new(EvalJobHandler {
            engine: Arc::clone(&engine),
            latency: Arc::clone(&eval_latency),
        }),
    );
    tokio::spawn(async move { eval_worker.run().await });

    // Bootstrap pass so a fresh database fills without waiting a full interval.
    if cfg.sync_schedule_enabled {
        enqueue_trigger(&sync_queue, SYNC_JOB_KIND).await;
    }

    let scheduler = Scheduler::new(cfg.clone(), sync_queue.clone(), eval_queue.clone());
    tokio::spawn(async move { scheduler.run().await });

    // --- HTTP API server ---
    let api_state = ApiState {
        pool: pool.clone(),
        sync_queue,
        eval_queue,
        sync_latency,
        eval_latency,
    };
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Job handlers
// ---------------------------------------------------------------------------

struct SyncJobHandler {
    reconciler: Arc<Reconciler>,
    latency: Arc<LatencyStats>,
}

#[async_trait]
impl JobHandler for SyncJobHandler {
    async fn handle(&self, _kind: &str, _payload: &Value) -> Result<()> {
        let started = Instant::now();
        let report = self.reconciler.sync_pass().await?;
        self.latency.record(started.elapsed());
        info!(
            "Sync job finished: {} discovered, {} created, {} skipped, {} errored",
            report.discovered, report.created, report.skipped, report.errored
        );
        Ok(())
    }
}

struct EvalJobHandler {
    engine: Arc<EvaluationEngine>,
    latency: Arc<LatencyStats>,
}

#[async_trait]
impl JobHandler for EvalJobHandler {
    async fn handle(&self, _kind: &str, _payload: &Value) -> Result<()> {
        let started = Instant::now();
        match self.engine.run_one_cycle().await? {
            EvaluationOutcome::Evaluated { .. } => self.latency.record(started.elapsed()),
            EvaluationOutcome::Idle => debug!("No markets needing evaluation"),
        }
        Ok(())
    }
}
