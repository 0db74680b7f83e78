// Batched persistence for usage logs.
//
// The write pipeline is the only producer of inserts; queries serve the
// billing generator, the admin usage endpoint and the aggregation job.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{MySql, Pool, QueryBuilder};

use crate::core::Result;
use crate::modules::usage::models::{UsageLog, UsageTotals};
use crate::modules::usage::repositories::partitions;

#[async_trait]
pub trait UsageLogRepository: Send + Sync {
    /// Append a batch in one statement. Order within the batch is not
    /// meaningful; downstream aggregation is commutative.
    async fn insert_batch(&self, logs: &[UsageLog]) -> Result<()>;

    /// Totals for one key over a half-open period [start, end)
    async fn totals_for_period(
        &self,
        api_key_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<UsageTotals>;

    /// Recent logs for the admin usage endpoint
    async fn recent_for_key(&self, api_key_id: &str, limit: u32) -> Result<Vec<UsageLog>>;

    /// Pre-create the partition for a month (idempotent)
    async fn ensure_partition(&self, year: i32, month: u32) -> Result<()>;

    /// Enforce retention by dropping whole partitions older than `cutoff`
    async fn drop_expired(&self, cutoff: NaiveDate) -> Result<u64>;
}

pub struct MySqlUsageLogRepository {
    pool: Pool<MySql>,
}

impl MySqlUsageLogRepository {
    pub fn new(pool: Pool<MySql>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UsageLogRepository for MySqlUsageLogRepository {
    async fn insert_batch(&self, logs: &[UsageLog]) -> Result<()> {
        if logs.is_empty() {
            return Ok(());
        }

        let mut builder: QueryBuilder<MySql> = QueryBuilder::new(
            "INSERT INTO usage_logs (api_key_id, endpoint, method, status_code, \
             response_time_ms, request_bytes, response_bytes, ip, country, timestamp) ",
        );
        builder.push_values(logs, |mut row, log| {
            row.push_bind(&log.api_key_id)
                .push_bind(&log.endpoint)
                .push_bind(&log.method)
                .push_bind(log.status_code)
                .push_bind(log.response_time_ms)
                .push_bind(log.request_bytes)
                .push_bind(log.response_bytes)
                .push_bind(&log.ip)
                .push_bind(&log.country)
                .push_bind(log.timestamp);
        });

        builder.build().execute(&self.pool).await?;
        Ok(())
    }

    async fn totals_for_period(
        &self,
        api_key_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<UsageTotals> {
        let totals = sqlx::query_as::<_, UsageTotals>(
            r#"
            SELECT
                CAST(COUNT(*) AS SIGNED) AS total_requests,
                CAST(COALESCE(SUM(status_code < 400), 0) AS SIGNED) AS success_requests,
                CAST(COALESCE(SUM(status_code >= 400), 0) AS SIGNED) AS error_requests,
                CAST(COALESCE(SUM(request_bytes + response_bytes), 0) AS SIGNED) AS total_bandwidth
            FROM usage_logs
            WHERE api_key_id = ? AND timestamp >= ? AND timestamp < ?
            "#,
        )
        .bind(api_key_id)
        .bind(start)
        .bind(end)
        .fetch_one(&self.pool)
        .await?;

        Ok(totals)
    }

    async fn recent_for_key(&self, api_key_id: &str, limit: u32) -> Result<Vec<UsageLog>> {
        let logs = sqlx::query_as::<_, UsageLog>(
            r#"
            SELECT api_key_id, endpoint, method, status_code, response_time_ms,
                   request_bytes, response_bytes, ip, country, timestamp
            FROM usage_logs
            WHERE api_key_id = ?
            ORDER BY timestamp DESC
            LIMIT ?
            "#,
        )
        .bind(api_key_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(logs)
    }

    async fn ensure_partition(&self, year: i32, month: u32) -> Result<()> {
        partitions::ensure_month_partition(&self.pool, "usage_logs", year, month).await?;
        Ok(())
    }

    async fn drop_expired(&self, cutoff: NaiveDate) -> Result<u64> {
        partitions::drop_partitions_before(&self.pool, "usage_logs", cutoff).await
    }
}
