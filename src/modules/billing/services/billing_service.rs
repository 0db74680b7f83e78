// Monthly billing generation.
//
// For a given calendar month, computes per-key totals from usage_logs and
// rate_limit_violations and upserts a completed record. Reruns overwrite
// the same (api_key_id, period_start) row, so the job is safe to retry.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use tracing::{info, warn};

use crate::core::{AppError, Result};
use crate::modules::api_keys::repositories::api_key_repository::ApiKeyRepository;
use crate::modules::billing::models::BillingRecord;
use crate::modules::billing::repositories::billing_repository::BillingRepository;
use crate::modules::usage::repositories::partitions::next_month;
use crate::modules::usage::repositories::{UsageLogRepository, ViolationRepository};

pub struct BillingService {
    api_key_repo: Arc<dyn ApiKeyRepository>,
    usage_repo: Arc<dyn UsageLogRepository>,
    violation_repo: Arc<dyn ViolationRepository>,
    billing_repo: Arc<dyn BillingRepository>,
}

impl BillingService {
    pub fn new(
        api_key_repo: Arc<dyn ApiKeyRepository>,
        usage_repo: Arc<dyn UsageLogRepository>,
        violation_repo: Arc<dyn ViolationRepository>,
        billing_repo: Arc<dyn BillingRepository>,
    ) -> Self {
        Self {
            api_key_repo,
            usage_repo,
            violation_repo,
            billing_repo,
        }
    }

    /// Generate records for every key with a presence during the month.
    /// Returns the number of records written.
    pub async fn generate_for_month(&self, year: i32, month: u32) -> Result<u64> {
        let (period_start, period_end) = month_bounds(year, month)?;
        let keys = self.api_key_repo.all_keys().await?;
        let mut written = 0u64;

        for key in keys {
            // Skip keys created after the period closed
            if key.created_at >= period_end {
                continue;
            }

            let totals = self
                .usage_repo
                .totals_for_period(&key.id, period_start, period_end)
                .await?;
            let rate_limit_hits = self
                .violation_repo
                .count_for_key_since(&key.id, period_start)
                .await?;

            if totals.total_requests == 0 && rate_limit_hits == 0 && key.deleted_at.is_some() {
                continue;
            }

            let record = BillingRecord::compute(
                &key.id,
                key.tier,
                period_start,
                period_end,
                &totals,
                rate_limit_hits,
            );

            if let Err(e) = self.billing_repo.upsert(&record).await {
                warn!(api_key_id = %key.id, error = %e, "Failed to write billing record");
                return Err(e);
            }
            written += 1;
        }

        info!(year, month, written, "Billing records generated");
        Ok(written)
    }
}

/// Half-open UTC bounds of a calendar month
pub fn month_bounds(year: i32, month: u32) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let start = Utc
        .with_ymd_and_hms(year, month, 1, 0, 0, 0)
        .single()
        .ok_or_else(|| AppError::internal(format!("invalid month {}-{}", year, month)))?;
    let (next_year, next_mon) = next_month(year, month);
    let end = Utc
        .with_ymd_and_hms(next_year, next_mon, 1, 0, 0, 0)
        .single()
        .ok_or_else(|| AppError::internal(format!("invalid month {}-{}", next_year, next_mon)))?;
    Ok((start, end))
}

/// The calendar month preceding the one containing `now`
pub fn previous_month(now: DateTime<Utc>) -> (i32, u32) {
    use chrono::Datelike;
    if now.month() == 1 {
        (now.year() - 1, 12)
    } else {
        (now.year(), now.month() - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_month_bounds() {
        let (start, end) = month_bounds(2026, 7).unwrap();
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 7, 1, 0, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_month_bounds_december() {
        let (start, end) = month_bounds(2026, 12).unwrap();
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 12, 1, 0, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2027, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_previous_month_wraps_january() {
        let january = Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap();
        assert_eq!(previous_month(january), (2025, 12));

        let august = Utc.with_ymd_and_hms(2026, 8, 1, 0, 30, 0).unwrap();
        assert_eq!(previous_month(august), (2026, 7));
    }
}
