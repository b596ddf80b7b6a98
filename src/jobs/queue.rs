use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;
use sqlx::{FromRow, SqlitePool};

use crate::config::{
    COMPLETED_JOB_RETENTION, FAILED_JOB_RETENTION, JOB_BACKOFF_BASE_MS, JOB_BACKOFF_MAX_MS,
};
use crate::error::Result;

#[derive(Debug, Clone, FromRow)]
pub struct JobRow {
    pub id: i64,
    pub queue: String,
    pub kind: String,
    pub payload: String,
    pub attempts: i64,
    pub max_attempts: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    Accepted(i64),
    Deduplicated,
}

/// Durable work queue over the jobs table. One instance per named queue;
/// the claim statement is the only consumer-side synchronization, so a job
/// lands in exactly one worker even with several pollers.
#[derive(Clone)]
pub struct JobQueue {
    pool: SqlitePool,
    name: String,
    max_attempts: i64,
}

impl JobQueue {
    pub fn new(pool: SqlitePool, name: &str, max_attempts: i64) -> Self {
        Self {
            pool,
            name: name.to_string(),
            max_attempts,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// At most one pending or running instance per (queue, kind). A request
    /// arriving while one is in flight is dropped as a duplicate.
    pub async fn enqueue(&self, kind: &str, payload: Value) -> Result<Enqueued> {
        let result = sqlx::query(
            r#"
            INSERT INTO jobs (queue, kind, payload, max_attempts, created_at)
            SELECT ?1, ?2, ?3, ?4, ?5
            WHERE NOT EXISTS (
                SELECT 1 FROM jobs
                WHERE queue = ?1 AND kind = ?2 AND status IN ('pending', 'running')
            )
            "#,
        )
        .bind(&self.name)
        .bind(kind)
        .bind(payload.to_string())
        .bind(self.max_attempts)
        .bind(now_ms())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            Ok(Enqueued::Deduplicated)
        } else {
            Ok(Enqueued::Accepted(result.last_insert_rowid()))
        }
    }

    /// Claims the oldest due pending job and marks it running. Returns None
    /// when nothing is due yet.
    pub async fn claim(&self) -> Result<Option<JobRow>> {
        let now = now_ms();
        let job = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE jobs
            SET status = 'running', started_at = ?1, attempts = attempts + 1
            WHERE id = (
                SELECT id FROM jobs
                WHERE queue = ?2 AND status = 'pending' AND run_after <= ?1
                ORDER BY id
                LIMIT 1
            )
            RETURNING *
            "#,
        )
        .bind(now)
        .bind(&self.name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(job)
    }

    pub async fn complete(&self, id: i64) -> Result<()> {
        sqlx::query("UPDATE jobs SET status = 'completed', finished_at = ?2 WHERE id = ?1")
            .bind(id)
            .bind(now_ms())
            .execute(&self.pool)
            .await?;
        self.prune().await
    }

    /// A failed job goes back to pending with exponential backoff until its
    /// attempt budget is spent, then it is marked failed for good.
    pub async fn fail(&self, job: &JobRow, error: &str) -> Result<()> {
        let now = now_ms();
        if job.attempts < job.max_attempts {
            sqlx::query(
                "UPDATE jobs SET status = 'pending', run_after = ?2, last_error = ?3 WHERE id = ?1",
            )
            .bind(job.id)
            .bind(now + backoff_millis(job.attempts))
            .bind(error)
            .execute(&self.pool)
            .await?;
            return Ok(());
        }

        sqlx::query(
            "UPDATE jobs SET status = 'failed', finished_at = ?2, last_error = ?3 WHERE id = ?1",
        )
        .bind(job.id)
        .bind(now)
        .bind(error)
        .execute(&self.pool)
        .await?;
        self.prune().await
    }

    pub async fn pending_count(&self) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM jobs WHERE queue = ?1 AND status = 'pending'",
        )
        .bind(&self.name)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Returns to pending any rows left 'running' by an earlier process.
    /// Under the single-instance model a running row at startup can only be
    /// a leftover, and it would otherwise block its (queue, kind) forever:
    /// enqueue dedupes against it and claim never selects it.
    pub async fn recover_stale(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'pending', run_after = 0 WHERE queue = ?1 AND status = 'running'",
        )
        .bind(&self.name)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Terminal jobs are kept only for inspection; everything but the newest
    /// few per status is deleted.
    async fn prune(&self) -> Result<()> {
        for (status, keep) in [
            ("completed", COMPLETED_JOB_RETENTION),
            ("failed", FAILED_JOB_RETENTION),
        ] {
            sqlx::query(
                r#"
                DELETE FROM jobs
                WHERE queue = ?1 AND status = ?2 AND id NOT IN (
                    SELECT id FROM jobs
                    WHERE queue = ?1 AND status = ?2
                    ORDER BY id DESC
                    LIMIT ?3
                )
                "#,
            )
            .bind(&self.name)
            .bind(status)
            .bind(keep)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }
}

/// Doubles from the base per prior attempt, capped. The shift is clamped so
/// a pathological attempt count cannot overflow.
pub fn backoff_millis(attempts: i64) -> i64 {
    let shift = (attempts - 1).clamp(0, 10) as u32;
    (JOB_BACKOFF_BASE_MS << shift).min(JOB_BACKOFF_MAX_MS)
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    async fn status_of(pool: &SqlitePool, id: i64) -> String {
        sqlx::query_scalar::<_, String>("SELECT status FROM jobs WHERE id = ?1")
            .bind(id)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    async fn make_due(pool: &SqlitePool, id: i64) {
        sqlx::query("UPDATE jobs SET run_after = 0 WHERE id = ?1")
            .bind(id)
            .execute(pool)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn claim_marks_running_and_is_exclusive() {
        let pool = test_pool().await;
        let queue = JobQueue::new(pool.clone(), "q", 3);

        let Enqueued::Accepted(id) = queue.enqueue("work", json!({})).await.unwrap() else {
            panic!("first enqueue must be accepted");
        };

        let job = queue.claim().await.unwrap().unwrap();
        assert_eq!(job.id, id);
        assert_eq!(job.kind, "work");
        assert_eq!(job.attempts, 1);
        assert_eq!(status_of(&pool, id).await, "running");

        assert!(queue.claim().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_requests_collapse_until_completion() {
        let pool = test_pool().await;
        let queue = JobQueue::new(pool.clone(), "q", 3);

        assert!(matches!(
            queue.enqueue("work", json!({})).await.unwrap(),
            Enqueued::Accepted(_)
        ));
        assert_eq!(
            queue.enqueue("work", json!({})).await.unwrap(),
            Enqueued::Deduplicated
        );

        let job = queue.claim().await.unwrap().unwrap();
        assert_eq!(
            queue.enqueue("work", json!({})).await.unwrap(),
            Enqueued::Deduplicated
        );

        queue.complete(job.id).await.unwrap();
        assert!(matches!(
            queue.enqueue("work", json!({})).await.unwrap(),
            Enqueued::Accepted(_)
        ));
    }

    #[tokio::test]
    async fn startup_recovery_releases_jobs_left_running() {
        let pool = test_pool().await;
        let queue = JobQueue::new(pool.clone(), "q", 3);

        queue.enqueue("work", json!({})).await.unwrap();
        let job = queue.claim().await.unwrap().unwrap();

        // A process death here would leave the row running: dedupe refuses
        // new requests and claim sees nothing pending.
        let restarted = JobQueue::new(pool.clone(), "q", 3);
        assert_eq!(
            restarted.enqueue("work", json!({})).await.unwrap(),
            Enqueued::Deduplicated
        );
        assert!(restarted.claim().await.unwrap().is_none());

        let recovered = restarted.recover_stale().await.unwrap();
        assert_eq!(recovered, 1);
        assert_eq!(restarted.recover_stale().await.unwrap(), 0);

        let reclaimed = restarted.claim().await.unwrap().unwrap();
        assert_eq!(reclaimed.id, job.id);
        assert_eq!(reclaimed.attempts, 2);
        assert_eq!(status_of(&pool, job.id).await, "running");
    }

    #[tokio::test]
    async fn different_kinds_do_not_deduplicate_each_other() {
        let pool = test_pool().await;
        let queue = JobQueue::new(pool.clone(), "q", 3);

        assert!(matches!(
            queue.enqueue("alpha", json!({})).await.unwrap(),
            Enqueued::Accepted(_)
        ));
        assert!(matches!(
            queue.enqueue("beta", json!({})).await.unwrap(),
            Enqueued::Accepted(_)
        ));
        assert_eq!(queue.pending_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn failure_requeues_with_backoff_until_budget_runs_out() {
        let pool = test_pool().await;
        let queue = JobQueue::new(pool.clone(), "q", 2);

        queue.enqueue("work", json!({})).await.unwrap();
        let job = queue.claim().await.unwrap().unwrap();
        queue.fail(&job, "first failure").await.unwrap();

        assert_eq!(status_of(&pool, job.id).await, "pending");
        // Not due yet, so it cannot be claimed immediately.
        assert!(queue.claim().await.unwrap().is_none());
        let run_after = sqlx::query_scalar::<_, i64>("SELECT run_after FROM jobs WHERE id = ?1")
            .bind(job.id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert!(run_after > now_ms());

        make_due(&pool, job.id).await;
        let job = queue.claim().await.unwrap().unwrap();
        assert_eq!(job.attempts, 2);
        queue.fail(&job, "second failure").await.unwrap();

        assert_eq!(status_of(&pool, job.id).await, "failed");
        let last_error = sqlx::query_scalar::<_, String>("SELECT last_error FROM jobs WHERE id = ?1")
            .bind(job.id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(last_error, "second failure");
    }

    #[tokio::test]
    async fn completed_history_is_pruned_to_the_retention_limit() {
        let pool = test_pool().await;
        let queue = JobQueue::new(pool.clone(), "q", 3);

        for i in 0..7 {
            queue.enqueue(&format!("work-{i}"), json!({})).await.unwrap();
            let job = queue.claim().await.unwrap().unwrap();
            queue.complete(job.id).await.unwrap();
        }

        let kept = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM jobs WHERE queue = 'q' AND status = 'completed'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(kept, COMPLETED_JOB_RETENTION);

        let oldest_kept = sqlx::query_scalar::<_, String>(
            "SELECT kind FROM jobs WHERE queue = 'q' AND status = 'completed' ORDER BY id LIMIT 1",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(oldest_kept, "work-2");
    }

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff_millis(1), 1_000);
        assert_eq!(backoff_millis(2), 2_000);
        assert_eq!(backoff_millis(3), 4_000);
        assert_eq!(backoff_millis(7), 60_000);
        assert_eq!(backoff_millis(100), 60_000);
        assert_eq!(backoff_millis(0), 1_000);
    }
}
