// Scheduler cadence and retry policy for the background job queue.

use chrono::{DateTime, Duration, TimeZone, Utc};

use viva_limiter::modules::jobs::models::{retry_delay, Job, JobKind, JobStatus};
use viva_limiter::modules::jobs::runner::is_due;

/// Walk a synthetic scheduler over a day of 30-second ticks and count how
/// often each kind comes due.
fn simulate_day(kind: JobKind, start: DateTime<Utc>) -> u32 {
    let mut last: Option<DateTime<Utc>> = None;
    let mut enqueued = 0;
    let mut now = start;
    let end = start + Duration::hours(24);

    while now < end {
        if is_due(kind, last, now) {
            last = Some(now);
            enqueued += 1;
        }
        now += Duration::seconds(30);
    }
    enqueued
}

#[test]
fn test_five_minute_tasks_run_288_times_a_day() {
    let start = Utc.with_ymd_and_hms(2026, 8, 2, 0, 0, 0).unwrap();
    assert_eq!(simulate_day(JobKind::AggregateUsage, start), 288);
    assert_eq!(simulate_day(JobKind::ProcessAlerts, start), 288);
    assert_eq!(simulate_day(JobKind::SyncCacheWithDb, start), 288);
}

#[test]
fn test_cleanup_runs_once_a_day() {
    let start = Utc.with_ymd_and_hms(2026, 8, 2, 0, 0, 0).unwrap();
    assert_eq!(simulate_day(JobKind::CleanupExpired, start), 1);
}

#[test]
fn test_billing_runs_once_on_the_first() {
    let first = Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).unwrap();
    assert_eq!(simulate_day(JobKind::GenerateBilling, first), 1);

    let second = Utc.with_ymd_and_hms(2026, 8, 2, 0, 0, 0).unwrap();
    assert_eq!(simulate_day(JobKind::GenerateBilling, second), 0);
}

#[test]
fn test_billing_reruns_next_month() {
    let july_first = Utc.with_ymd_and_hms(2026, 7, 1, 0, 0, 30).unwrap();
    let august_first = Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 30).unwrap();
    assert!(is_due(JobKind::GenerateBilling, Some(july_first), august_first));
}

#[test]
fn test_rate_limit_check_is_never_scheduled() {
    let start = Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).unwrap();
    assert_eq!(simulate_day(JobKind::RateLimitCheck, start), 0);
}

#[test]
fn test_retry_delay_stays_within_bounds() {
    // at least 5 retries before a job can die, all with bounded backoff
    for attempt in 1..=Job::DEFAULT_MAX_ATTEMPTS {
        let delay = retry_delay(attempt);
        assert!(delay.num_seconds() >= 30);
        assert!(delay.num_seconds() <= 3_600);
    }
    // monotonically non-decreasing
    for attempt in 1..10 {
        assert!(retry_delay(attempt + 1) >= retry_delay(attempt));
    }
}

#[test]
fn test_job_kind_wire_names() {
    assert_eq!(
        serde_json::to_string(&JobKind::GenerateBilling).unwrap(),
        r#""generate_billing""#
    );
    assert_eq!(
        serde_json::to_string(&JobKind::CleanupExpired).unwrap(),
        r#""cleanup_expired""#
    );
    let parsed: JobKind = serde_json::from_str(r#""rate_limit_check""#).unwrap();
    assert_eq!(parsed, JobKind::RateLimitCheck);
}

#[test]
fn test_new_jobs_start_pending_with_retry_budget() {
    let job = Job::new(
        JobKind::RateLimitCheck,
        serde_json::json!({"api_key_id": "k1"}),
        Utc::now(),
    );
    assert_eq!(job.status, JobStatus::Pending);
    assert!(job.max_attempts >= 5);
    assert_eq!(job.payload["api_key_id"], "k1");
}
