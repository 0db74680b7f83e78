use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::modules::api_keys::models::Tier;

/// A denied decision on an active key. Append-only, partitioned by month,
/// retained 180 days. `event_id` is unique so pipeline retries never
/// produce a second row for the same denial.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RateLimitViolation {
    pub event_id: String,
    pub api_key_id: String,
    pub endpoint: String,
    pub method: String,
    pub client_ip: Option<String>,
    #[sqlx(rename = "limit_value")]
    pub limit: i64,
    #[sqlx(rename = "window_seconds")]
    pub window: i64,
    pub current_count: i64,
    pub tier: Tier,
    pub is_repeated: bool,
    pub violation_count: i64,
    pub processed_at: DateTime<Utc>,
}

impl RateLimitViolation {
    pub fn new_event_id() -> String {
        Uuid::new_v4().to_string()
    }
}
