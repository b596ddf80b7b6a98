use std::time::Duration;

use tokio::time::interval;
use tracing::{debug, error, info};

use crate::config::{Config, EVAL_JOB_KIND, SYNC_JOB_KIND};
use crate::jobs::queue::{Enqueued, JobQueue};

/// Fires the two recurring triggers. Both go through queues rather than
/// running work inline, so a pass that outlives its interval is deduplicated
/// instead of stacking a second concurrent run.
pub struct Scheduler {
    cfg: Config,
    sync_queue: JobQueue,
    eval_queue: JobQueue,
}

impl Scheduler {
    pub fn new(cfg: Config, sync_queue: JobQueue, eval_queue: JobQueue) -> Self {
        Self {
            cfg,
            sync_queue,
            eval_queue,
        }
    }

    pub async fn run(self) {
        let mut sync_ticker = interval(Duration::from_secs(self.cfg.sync_interval_secs));
        let mut eval_ticker = interval(Duration::from_secs(self.cfg.eval_interval_secs));
        // skip both immediate first ticks
        sync_ticker.tick().await;
        eval_ticker.tick().await;

        if !self.cfg.sync_schedule_enabled {
            info!("Scheduled discovery is disabled; sync runs only when triggered over HTTP");
        }

        loop {
            tokio::select! {
                _ = sync_ticker.tick() => self.fire_sync().await,
                _ = eval_ticker.tick() => self.fire_eval().await,
            }
        }
    }

    async fn fire_sync(&self) {
        if !self.cfg.sync_schedule_enabled {
            return;
        }
        enqueue_trigger(&self.sync_queue, SYNC_JOB_KIND).await;
    }

    async fn fire_eval(&self) {
        enqueue_trigger(&self.eval_queue, EVAL_JOB_KIND).await;
    }
}

pub async fn enqueue_trigger(queue: &JobQueue, kind: &str) {
    match queue.enqueue(kind, serde_json::json!({})).await {
        Ok(Enqueued::Accepted(id)) => info!("Enqueued {kind} job {id} on {}", queue.name()),
        Ok(Enqueued::Deduplicated) => debug!("{kind} already queued on {}", queue.name()),
        Err(e) => error!("Failed to enqueue {kind} on {}: {e}", queue.name()),
    }
}
