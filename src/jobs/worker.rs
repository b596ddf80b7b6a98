use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::interval;
use tracing::{error, info};

use crate::config::JOB_POLL_INTERVAL_MS;
use crate::error::Result;
use crate::jobs::queue::{JobQueue, JobRow};

/// Executes one kind of background work. Handlers get the job kind so a
/// single handler can serve every kind on its queue.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, kind: &str, payload: &Value) -> Result<()>;
}

/// Polls one queue and runs claimed jobs to completion, one at a time.
pub struct JobWorker {
    queue: JobQueue,
    handler: Arc<dyn JobHandler>,
}

impl JobWorker {
    pub fn new(queue: JobQueue, handler: Arc<dyn JobHandler>) -> Self {
        Self { queue, handler }
    }

    pub async fn run(self) {
        let mut ticker = interval(Duration::from_millis(JOB_POLL_INTERVAL_MS));
        ticker.tick().await; // skip immediate first tick

        loop {
            ticker.tick().await;
            if let Err(e) = self.drain().await {
                error!(
                    "Worker for queue {} hit a store error: {e}",
                    self.queue.name()
                );
            }
        }
    }

    /// Works the queue dry. Jobs requeued with backoff are not due, so this
    /// terminates even when every job fails.
    pub async fn drain(&self) -> Result<()> {
        while let Some(job) = self.queue.claim().await? {
            self.dispatch(job).await?;
        }
        Ok(())
    }

    async fn dispatch(&self, job: JobRow) -> Result<()> {
        let payload: Value = serde_json::from_str(&job.payload).unwrap_or(Value::Null);
        info!(
            "Running job {} ({}) on queue {}",
            job.id,
            job.kind,
            self.queue.name()
        );

        match self.handler.handle(&job.kind, &payload).await {
            Ok(()) => self.queue.complete(job.id).await,
            Err(e) => {
                error!(
                    "Job {} ({}) failed on attempt {}: {e}",
                    job.id, job.kind, job.attempts
                );
                self.queue.fail(&job, &e.to_string()).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use serde_json::json;
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::SqlitePool;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    struct RecordingHandler {
        calls: Mutex<Vec<(String, Value)>>,
    }

    #[async_trait]
    impl JobHandler for RecordingHandler {
        async fn handle(&self, kind: &str, payload: &Value) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push((kind.to_string(), payload.clone()));
            Ok(())
        }
    }

    struct FailingHandler {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl JobHandler for FailingHandler {
        async fn handle(&self, _kind: &str, _payload: &Value) -> Result<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(AppError::Indexer("index unavailable".to_string()))
        }
    }

    #[tokio::test]
    async fn successful_jobs_are_completed_with_their_payload() {
        let pool = test_pool().await;
        let queue = JobQueue::new(pool.clone(), "q", 3);
        let handler = Arc::new(RecordingHandler {
            calls: Mutex::new(Vec::new()),
        });
        let worker = JobWorker::new(queue.clone(), handler.clone());

        queue.enqueue("sync", json!({ "window": 5 })).await.unwrap();
        worker.drain().await.unwrap();

        let calls = handler.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "sync");
        assert_eq!(calls[0].1, json!({ "window": 5 }));
        drop(calls);

        assert_eq!(queue.pending_count().await.unwrap(), 0);
        let status = sqlx::query_scalar::<_, String>("SELECT status FROM jobs WHERE kind = 'sync'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(status, "completed");
    }

    #[tokio::test]
    async fn failing_jobs_back_off_and_eventually_fail() {
        let pool = test_pool().await;
        let queue = JobQueue::new(pool.clone(), "q", 2);
        let handler = Arc::new(FailingHandler {
            attempts: AtomicUsize::new(0),
        });
        let worker = JobWorker::new(queue.clone(), handler.clone());

        queue.enqueue("sync", json!({})).await.unwrap();
        worker.drain().await.unwrap();

        // One attempt spent; the retry is parked in the future.
        assert_eq!(handler.attempts.load(Ordering::SeqCst), 1);
        assert_eq!(queue.pending_count().await.unwrap(), 1);

        sqlx::query("UPDATE jobs SET run_after = 0")
            .execute(&pool)
            .await
            .unwrap();
        worker.drain().await.unwrap();

        assert_eq!(handler.attempts.load(Ordering::SeqCst), 2);
        let status = sqlx::query_scalar::<_, String>("SELECT status FROM jobs WHERE kind = 'sync'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(status, "failed");
    }

    #[tokio::test]
    async fn drain_processes_every_due_job() {
        let pool = test_pool().await;
        let queue = JobQueue::new(pool.clone(), "q", 3);
        let handler = Arc::new(RecordingHandler {
            calls: Mutex::new(Vec::new()),
        });
        let worker = JobWorker::new(queue.clone(), handler.clone());

        queue.enqueue("alpha", json!({})).await.unwrap();
        queue.enqueue("beta", json!({})).await.unwrap();
        worker.drain().await.unwrap();

        let kinds: Vec<String> = handler
            .calls
            .lock()
            .unwrap()
            .iter()
            .map(|(kind, _)| kind.clone())
            .collect();
        assert_eq!(kinds, vec!["alpha", "beta"]);
    }
}
