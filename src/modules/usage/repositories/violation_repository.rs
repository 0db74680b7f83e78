// Batched persistence for rate-limit violations.
//
// Inserts are keyed on event_id with INSERT IGNORE so a retried batch
// never duplicates a denial: exactly one row per denied decision survives
// regardless of how many flush attempts it took.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{MySql, Pool, QueryBuilder, Row};

use crate::core::Result;
use crate::modules::usage::models::RateLimitViolation;
use crate::modules::usage::repositories::partitions;

#[async_trait]
pub trait ViolationRepository: Send + Sync {
    /// Append a batch; rows whose event_id already exists are skipped
    async fn insert_batch(&self, violations: &[RateLimitViolation]) -> Result<()>;

    /// Violation count for one key since `since`
    async fn count_for_key_since(&self, api_key_id: &str, since: DateTime<Utc>) -> Result<i64>;

    /// Violation count per key since `since`, for spike evaluation
    async fn counts_since(&self, since: DateTime<Utc>) -> Result<Vec<(String, i64)>>;

    /// Recent violations for the admin endpoint
    async fn recent_for_key(
        &self,
        api_key_id: &str,
        limit: u32,
    ) -> Result<Vec<RateLimitViolation>>;

    /// Pre-create the partition for a month (idempotent)
    async fn ensure_partition(&self, year: i32, month: u32) -> Result<()>;

    /// Enforce retention by dropping whole partitions older than `cutoff`
    async fn drop_expired(&self, cutoff: NaiveDate) -> Result<u64>;
}

pub struct MySqlViolationRepository {
    pool: Pool<MySql>,
}

impl MySqlViolationRepository {
    pub fn new(pool: Pool<MySql>) -> Self {
        Self { pool }
    }
}

const SELECT_COLUMNS: &str = r#"
    event_id, api_key_id, endpoint, method, client_ip, limit_value,
    window_seconds, current_count, tier, is_repeated, violation_count, processed_at
"#;

#[async_trait]
impl ViolationRepository for MySqlViolationRepository {
    async fn insert_batch(&self, violations: &[RateLimitViolation]) -> Result<()> {
        if violations.is_empty() {
            return Ok(());
        }

        let mut builder: QueryBuilder<MySql> = QueryBuilder::new(
            "INSERT IGNORE INTO rate_limit_violations (event_id, api_key_id, endpoint, \
             method, client_ip, limit_value, window_seconds, current_count, tier, \
             is_repeated, violation_count, processed_at) ",
        );
        builder.push_values(violations, |mut row, v| {
            row.push_bind(&v.event_id)
                .push_bind(&v.api_key_id)
                .push_bind(&v.endpoint)
                .push_bind(&v.method)
                .push_bind(&v.client_ip)
                .push_bind(v.limit)
                .push_bind(v.window)
                .push_bind(v.current_count)
                .push_bind(v.tier)
                .push_bind(v.is_repeated)
                .push_bind(v.violation_count)
                .push_bind(v.processed_at);
        });

        builder.build().execute(&self.pool).await?;
        Ok(())
    }

    async fn count_for_key_since(&self, api_key_id: &str, since: DateTime<Utc>) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM rate_limit_violations WHERE api_key_id = ? AND processed_at >= ?",
        )
        .bind(api_key_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("n")?)
    }

    async fn counts_since(&self, since: DateTime<Utc>) -> Result<Vec<(String, i64)>> {
        let rows = sqlx::query(
            r#"
            SELECT api_key_id, COUNT(*) AS n
            FROM rate_limit_violations
            WHERE processed_at >= ?
            GROUP BY api_key_id
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        let mut counts = Vec::with_capacity(rows.len());
        for row in rows {
            counts.push((row.try_get("api_key_id")?, row.try_get("n")?));
        }
        Ok(counts)
    }

    async fn recent_for_key(
        &self,
        api_key_id: &str,
        limit: u32,
    ) -> Result<Vec<RateLimitViolation>> {
        let violations = sqlx::query_as::<_, RateLimitViolation>(&format!(
            "SELECT {} FROM rate_limit_violations WHERE api_key_id = ? ORDER BY processed_at DESC LIMIT ?",
            SELECT_COLUMNS
        ))
        .bind(api_key_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(violations)
    }

    async fn ensure_partition(&self, year: i32, month: u32) -> Result<()> {
        partitions::ensure_month_partition(&self.pool, "rate_limit_violations", year, month)
            .await?;
        Ok(())
    }

    async fn drop_expired(&self, cutoff: NaiveDate) -> Result<u64> {
        partitions::drop_partitions_before(&self.pool, "rate_limit_violations", cutoff).await
    }
}
