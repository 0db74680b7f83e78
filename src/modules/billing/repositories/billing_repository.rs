// Persistence for billing records.
//
// The unique (api_key_id, period_start) index both prevents overlapping
// periods for a key and makes generation reruns an overwrite instead of a
// duplicate.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{MySql, Pool};

use crate::core::Result;
use crate::modules::billing::models::BillingRecord;

#[async_trait]
pub trait BillingRepository: Send + Sync {
    /// Insert or overwrite the record for (api_key_id, period_start)
    async fn upsert(&self, record: &BillingRecord) -> Result<()>;

    async fn find_for_period(
        &self,
        api_key_id: &str,
        period_start: DateTime<Utc>,
    ) -> Result<Option<BillingRecord>>;

    async fn list_for_key(&self, api_key_id: &str, limit: u32) -> Result<Vec<BillingRecord>>;
}

pub struct MySqlBillingRepository {
    pool: Pool<MySql>,
}

impl MySqlBillingRepository {
    pub fn new(pool: Pool<MySql>) -> Self {
        Self { pool }
    }
}

const SELECT_COLUMNS: &str = r#"
    id, api_key_id, period_start, period_end, total_requests, success_requests,
    error_requests, overage_requests, rate_limit_hits, total_bandwidth,
    base_amount, overage_amount, total_amount, tier_at_start, tier_at_end,
    status, created_at, updated_at
"#;

#[async_trait]
impl BillingRepository for MySqlBillingRepository {
    async fn upsert(&self, record: &BillingRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO billing_records (
                id, api_key_id, period_start, period_end, total_requests,
                success_requests, error_requests, overage_requests, rate_limit_hits,
                total_bandwidth, base_amount, overage_amount, total_amount,
                tier_at_start, tier_at_end, status, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON DUPLICATE KEY UPDATE
                period_end = VALUES(period_end),
                total_requests = VALUES(total_requests),
                success_requests = VALUES(success_requests),
                error_requests = VALUES(error_requests),
                overage_requests = VALUES(overage_requests),
                rate_limit_hits = VALUES(rate_limit_hits),
                total_bandwidth = VALUES(total_bandwidth),
                base_amount = VALUES(base_amount),
                overage_amount = VALUES(overage_amount),
                total_amount = VALUES(total_amount),
                tier_at_end = VALUES(tier_at_end),
                status = VALUES(status),
                updated_at = VALUES(updated_at)
            "#,
        )
        .bind(&record.id)
        .bind(&record.api_key_id)
        .bind(record.period_start)
        .bind(record.period_end)
        .bind(record.total_requests)
        .bind(record.success_requests)
        .bind(record.error_requests)
        .bind(record.overage_requests)
        .bind(record.rate_limit_hits)
        .bind(record.total_bandwidth)
        .bind(record.base_amount)
        .bind(record.overage_amount)
        .bind(record.total_amount)
        .bind(record.tier_at_start)
        .bind(record.tier_at_end)
        .bind(record.status)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_for_period(
        &self,
        api_key_id: &str,
        period_start: DateTime<Utc>,
    ) -> Result<Option<BillingRecord>> {
        let record = sqlx::query_as::<_, BillingRecord>(&format!(
            "SELECT {} FROM billing_records WHERE api_key_id = ? AND period_start = ?",
            SELECT_COLUMNS
        ))
        .bind(api_key_id)
        .bind(period_start)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn list_for_key(&self, api_key_id: &str, limit: u32) -> Result<Vec<BillingRecord>> {
        let records = sqlx::query_as::<_, BillingRecord>(&format!(
            "SELECT {} FROM billing_records WHERE api_key_id = ? ORDER BY period_start DESC LIMIT ?",
            SELECT_COLUMNS
        ))
        .bind(api_key_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }
}
