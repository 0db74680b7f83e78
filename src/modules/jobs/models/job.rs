// Durable background jobs.
//
// Rows in background_jobs drive the periodic tasks. Every task is
// idempotent, so a job observed mid-crash simply runs again; exhausted
// retries park the row as dead and raise a system_health alert.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Named background tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR(30)", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    AggregateUsage,
    GenerateBilling,
    ProcessAlerts,
    CleanupExpired,
    SyncCacheWithDb,
    RateLimitCheck,
}

impl JobKind {
    /// Periodic kinds scheduled by the runner; RateLimitCheck is ad-hoc
    pub const PERIODIC: [JobKind; 5] = [
        JobKind::AggregateUsage,
        JobKind::GenerateBilling,
        JobKind::ProcessAlerts,
        JobKind::CleanupExpired,
        JobKind::SyncCacheWithDb,
    ];
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobKind::AggregateUsage => write!(f, "aggregate_usage"),
            JobKind::GenerateBilling => write!(f, "generate_billing"),
            JobKind::ProcessAlerts => write!(f, "process_alerts"),
            JobKind::CleanupExpired => write!(f, "cleanup_expired"),
            JobKind::SyncCacheWithDb => write!(f, "sync_cache_with_db"),
            JobKind::RateLimitCheck => write!(f, "rate_limit_check"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR(20)", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    /// Retries exhausted; kept for operator inspection
    Dead,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Job {
    pub id: String,
    pub kind: JobKind,
    #[sqlx(json)]
    #[serde(default)]
    pub payload: serde_json::Value,
    pub status: JobStatus,
    pub attempts: i32,
    pub max_attempts: i32,
    pub run_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub const DEFAULT_MAX_ATTEMPTS: i32 = 5;

    pub fn new(kind: JobKind, payload: serde_json::Value, run_at: DateTime<Utc>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            payload,
            status: JobStatus::Pending,
            attempts: 0,
            max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
            run_at,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Exponential backoff for transient task failures: 30s doubling per
/// attempt, capped at one hour.
pub fn retry_delay(attempts: i32) -> ChronoDuration {
    let exponent = attempts.max(1).min(8) - 1;
    let seconds = (30i64 << exponent).min(3_600);
    ChronoDuration::seconds(seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names_are_stable() {
        assert_eq!(JobKind::AggregateUsage.to_string(), "aggregate_usage");
        assert_eq!(JobKind::SyncCacheWithDb.to_string(), "sync_cache_with_db");
        assert_eq!(JobKind::RateLimitCheck.to_string(), "rate_limit_check");
    }

    #[test]
    fn test_retry_delay_doubles_and_caps() {
        assert_eq!(retry_delay(1).num_seconds(), 30);
        assert_eq!(retry_delay(2).num_seconds(), 60);
        assert_eq!(retry_delay(3).num_seconds(), 120);
        assert_eq!(retry_delay(20).num_seconds(), 3_600);
    }

    #[test]
    fn test_new_job_is_pending() {
        let job = Job::new(JobKind::ProcessAlerts, serde_json::json!({}), Utc::now());
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.max_attempts, Job::DEFAULT_MAX_ATTEMPTS);
    }
}
