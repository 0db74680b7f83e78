use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One validated request, persisted asynchronously. Append-only,
/// partitioned by month, retained 90 days.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UsageLog {
    pub api_key_id: String,
    pub endpoint: String,
    pub method: String,
    pub status_code: i32,
    pub response_time_ms: i64,
    pub request_bytes: i64,
    pub response_bytes: i64,
    pub ip: Option<String>,
    pub country: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Caller-side request details carried into usage logs and violations.
/// The transport layer fills this in; the engine never inspects headers.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub endpoint: String,
    pub method: String,
    pub client_ip: Option<String>,
    pub country: Option<String>,
    pub request_bytes: i64,
    /// Ident minted by the request-id layer, for decision log correlation
    pub request_id: Option<String>,
}

/// Aggregated usage totals for a key over a period
#[derive(Debug, Clone, Default, FromRow)]
pub struct UsageTotals {
    pub total_requests: i64,
    pub success_requests: i64,
    pub error_requests: i64,
    pub total_bandwidth: i64,
}
