// Monthly billing records.
//
// One record per (api_key, calendar month), immutable once completed.
// Amounts are computed from the usage-log totals: the tier's base charge
// plus a per-1,000-request overage beyond the included quota.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::modules::api_keys::models::Tier;
use crate::modules::usage::models::UsageTotals;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR(20)", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BillingStatus {
    /// Period still open
    Active,
    /// Generation in progress
    Processing,
    /// Finalized; immutable
    Completed,
}

impl std::fmt::Display for BillingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BillingStatus::Active => write!(f, "active"),
            BillingStatus::Processing => write!(f, "processing"),
            BillingStatus::Completed => write!(f, "completed"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BillingRecord {
    pub id: String,
    pub api_key_id: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub total_requests: i64,
    pub success_requests: i64,
    pub error_requests: i64,
    pub overage_requests: i64,
    pub rate_limit_hits: i64,
    pub total_bandwidth: i64,
    pub base_amount: Decimal,
    pub overage_amount: Decimal,
    pub total_amount: Decimal,
    pub tier_at_start: Tier,
    pub tier_at_end: Tier,
    pub status: BillingStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BillingRecord {
    /// Build a completed record from period totals. Overage is billed
    /// pro-rata at the tier's per-1,000 rate, rounded to cents.
    #[allow(clippy::too_many_arguments)]
    pub fn compute(
        api_key_id: &str,
        tier: Tier,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
        totals: &UsageTotals,
        rate_limit_hits: i64,
    ) -> Self {
        let overage_requests = (totals.total_requests - tier.included_requests()).max(0);
        let base_amount = tier.monthly_base();
        let overage_amount = (tier.overage_rate_per_thousand() * Decimal::from(overage_requests)
            / Decimal::from(1_000))
        .round_dp(2);
        let now = Utc::now();

        Self {
            id: Uuid::new_v4().to_string(),
            api_key_id: api_key_id.to_string(),
            period_start,
            period_end,
            total_requests: totals.total_requests,
            success_requests: totals.success_requests,
            error_requests: totals.error_requests,
            overage_requests,
            rate_limit_hits,
            total_bandwidth: totals.total_bandwidth,
            base_amount,
            overage_amount,
            total_amount: base_amount + overage_amount,
            tier_at_start: tier,
            tier_at_end: tier,
            status: BillingStatus::Completed,
            created_at: now,
            updated_at: now,
        }
    }
}
