// Durable work queue over the background_jobs table.
//
// Claiming uses FOR UPDATE SKIP LOCKED inside a short transaction so
// multiple runner workers (or instances) never execute the same row
// concurrently. Periodic enqueues are deduplicated against open rows of
// the same kind.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{MySql, Pool, Row};

use crate::core::Result;
use crate::modules::jobs::models::{Job, JobKind, JobStatus};

#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Insert a job unconditionally (ad-hoc kinds)
    async fn enqueue(&self, job: &Job) -> Result<()>;

    /// Insert unless a pending or running row of the same kind exists.
    /// Returns false when deduplicated.
    async fn enqueue_if_absent(&self, job: &Job) -> Result<bool>;

    /// Claim the next due job and mark it running
    async fn claim_due(&self, now: DateTime<Utc>) -> Result<Option<Job>>;

    async fn complete(&self, id: &str) -> Result<()>;

    /// Reschedule after a transient failure
    async fn reschedule(&self, id: &str, run_at: DateTime<Utc>, error: &str) -> Result<()>;

    /// Park after exhausted retries
    async fn mark_dead(&self, id: &str, error: &str) -> Result<()>;

    /// Remove old completed rows so the queue table stays small
    async fn prune_completed_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

pub struct MySqlJobRepository {
    pool: Pool<MySql>,
}

impl MySqlJobRepository {
    pub fn new(pool: Pool<MySql>) -> Self {
        Self { pool }
    }
}

const SELECT_COLUMNS: &str = r#"
    id, kind, payload, status, attempts, max_attempts, run_at,
    last_error, created_at, updated_at
"#;

async fn insert_job(pool: &Pool<MySql>, job: &Job) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO background_jobs (
            id, kind, payload, status, attempts, max_attempts, run_at,
            last_error, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&job.id)
    .bind(job.kind)
    .bind(serde_json::to_string(&job.payload)?)
    .bind(job.status)
    .bind(job.attempts)
    .bind(job.max_attempts)
    .bind(job.run_at)
    .bind(&job.last_error)
    .bind(job.created_at)
    .bind(job.updated_at)
    .execute(pool)
    .await?;

    Ok(())
}

#[async_trait]
impl JobRepository for MySqlJobRepository {
    async fn enqueue(&self, job: &Job) -> Result<()> {
        insert_job(&self.pool, job).await
    }

    async fn enqueue_if_absent(&self, job: &Job) -> Result<bool> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM background_jobs WHERE kind = ? AND status IN ('pending', 'running')",
        )
        .bind(job.kind)
        .fetch_one(&self.pool)
        .await?;

        let open: i64 = row.try_get("n")?;
        if open > 0 {
            return Ok(false);
        }

        insert_job(&self.pool, job).await?;
        Ok(true)
    }

    async fn claim_due(&self, now: DateTime<Utc>) -> Result<Option<Job>> {
        let mut tx = self.pool.begin().await?;

        let job = sqlx::query_as::<_, Job>(&format!(
            r#"
            SELECT {}
            FROM background_jobs
            WHERE status = 'pending' AND run_at <= ?
            ORDER BY run_at
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#,
            SELECT_COLUMNS
        ))
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(mut job) = job else {
            tx.rollback().await?;
            return Ok(None);
        };

        sqlx::query(
            "UPDATE background_jobs SET status = 'running', attempts = attempts + 1, updated_at = ? WHERE id = ?",
        )
        .bind(now)
        .bind(&job.id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        job.status = JobStatus::Running;
        job.attempts += 1;
        Ok(Some(job))
    }

    async fn complete(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE background_jobs SET status = 'completed', updated_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn reschedule(&self, id: &str, run_at: DateTime<Utc>, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE background_jobs SET status = 'pending', run_at = ?, last_error = ?, updated_at = ? WHERE id = ?",
        )
        .bind(run_at)
        .bind(error)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_dead(&self, id: &str, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE background_jobs SET status = 'dead', last_error = ?, updated_at = ? WHERE id = ?",
        )
        .bind(error)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn prune_completed_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result =
            sqlx::query("DELETE FROM background_jobs WHERE status = 'completed' AND updated_at < ?")
                .bind(cutoff)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected())
    }
}
