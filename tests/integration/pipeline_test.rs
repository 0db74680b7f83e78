// Write pipeline behavior: batching, backpressure, dead-lettering and
// shutdown draining, driven through mock repositories.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::Mutex;

use viva_limiter::config::PipelineConfig;
use viva_limiter::core::{AppError, Result};
use viva_limiter::modules::api_keys::models::Tier;
use viva_limiter::modules::usage::models::{RateLimitViolation, UsageLog, UsageTotals};
use viva_limiter::modules::usage::pipeline::{DeadLetterSink, WritePipeline};
use viva_limiter::modules::usage::repositories::{UsageLogRepository, ViolationRepository};

fn usage_log(n: i64) -> UsageLog {
    UsageLog {
        api_key_id: format!("key-{}", n),
        endpoint: "/api/validate".to_string(),
        method: "POST".to_string(),
        status_code: 200,
        response_time_ms: 1,
        request_bytes: 64,
        response_bytes: 0,
        ip: None,
        country: None,
        timestamp: Utc::now(),
    }
}

fn violation(event_id: &str) -> RateLimitViolation {
    RateLimitViolation {
        event_id: event_id.to_string(),
        api_key_id: "key-1".to_string(),
        endpoint: "/api/validate".to_string(),
        method: "POST".to_string(),
        client_ip: None,
        limit: 5,
        window: 60,
        current_count: 5,
        tier: Tier::Free,
        is_repeated: false,
        violation_count: 1,
        processed_at: Utc::now(),
    }
}

fn test_config() -> PipelineConfig {
    PipelineConfig {
        queue_capacity: 100,
        workers: 1,
        batch_size: 100,
        flush_interval: Duration::from_millis(100),
        violation_enqueue_timeout: Duration::from_millis(50),
    }
}

/// Records inserted batches
#[derive(Default)]
struct RecordingUsageRepo {
    logs: Mutex<Vec<UsageLog>>,
    batches: AtomicUsize,
    delay: Option<Duration>,
}

#[async_trait]
impl UsageLogRepository for RecordingUsageRepo {
    async fn insert_batch(&self, logs: &[UsageLog]) -> Result<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.batches.fetch_add(1, Ordering::SeqCst);
        self.logs.lock().await.extend_from_slice(logs);
        Ok(())
    }

    async fn totals_for_period(
        &self,
        _api_key_id: &str,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> Result<UsageTotals> {
        Ok(UsageTotals::default())
    }

    async fn recent_for_key(&self, _api_key_id: &str, _limit: u32) -> Result<Vec<UsageLog>> {
        Ok(vec![])
    }

    async fn ensure_partition(&self, _year: i32, _month: u32) -> Result<()> {
        Ok(())
    }

    async fn drop_expired(&self, _cutoff: NaiveDate) -> Result<u64> {
        Ok(0)
    }
}

#[derive(Default)]
struct RecordingViolationRepo {
    violations: Mutex<Vec<RateLimitViolation>>,
    fail: bool,
}

#[async_trait]
impl ViolationRepository for RecordingViolationRepo {
    async fn insert_batch(&self, violations: &[RateLimitViolation]) -> Result<()> {
        if self.fail {
            return Err(AppError::internal("violations table unavailable"));
        }
        self.violations.lock().await.extend_from_slice(violations);
        Ok(())
    }

    async fn count_for_key_since(&self, _api_key_id: &str, _since: DateTime<Utc>) -> Result<i64> {
        Ok(0)
    }

    async fn counts_since(&self, _since: DateTime<Utc>) -> Result<Vec<(String, i64)>> {
        Ok(vec![])
    }

    async fn recent_for_key(
        &self,
        _api_key_id: &str,
        _limit: u32,
    ) -> Result<Vec<RateLimitViolation>> {
        Ok(vec![])
    }

    async fn ensure_partition(&self, _year: i32, _month: u32) -> Result<()> {
        Ok(())
    }

    async fn drop_expired(&self, _cutoff: NaiveDate) -> Result<u64> {
        Ok(0)
    }
}

#[derive(Default)]
struct MemoryDlq {
    payloads: Mutex<Vec<String>>,
}

#[async_trait]
impl DeadLetterSink for MemoryDlq {
    async fn push(&self, payload: &str) -> Result<()> {
        self.payloads.lock().await.push(payload.to_string());
        Ok(())
    }
}

#[tokio::test]
async fn test_time_based_flush() {
    let usage_repo = Arc::new(RecordingUsageRepo::default());
    let violation_repo = Arc::new(RecordingViolationRepo::default());
    let dlq = Arc::new(MemoryDlq::default());

    let pipeline = WritePipeline::spawn(
        &test_config(),
        usage_repo.clone(),
        violation_repo.clone(),
        dlq,
    );
    let handle = pipeline.handle();

    for n in 0..3 {
        handle.enqueue_usage(usage_log(n));
    }

    // batch_size is 100, so only the 100 ms timer can flush these
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(usage_repo.logs.lock().await.len(), 3);

    drop(handle);
    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_size_based_flush_batches_together() {
    let usage_repo = Arc::new(RecordingUsageRepo::default());
    let violation_repo = Arc::new(RecordingViolationRepo::default());
    let dlq = Arc::new(MemoryDlq::default());

    let config = PipelineConfig {
        batch_size: 5,
        flush_interval: Duration::from_secs(10),
        ..test_config()
    };
    let pipeline = WritePipeline::spawn(&config, usage_repo.clone(), violation_repo.clone(), dlq);
    let handle = pipeline.handle();

    for n in 0..5 {
        handle.enqueue_usage(usage_log(n));
    }

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(usage_repo.logs.lock().await.len(), 5);
    // a full batch flushes as one statement, not five
    assert_eq!(usage_repo.batches.load(Ordering::SeqCst), 1);

    drop(handle);
    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_flushes_accepted_events() {
    let usage_repo = Arc::new(RecordingUsageRepo::default());
    let violation_repo = Arc::new(RecordingViolationRepo::default());
    let dlq = Arc::new(MemoryDlq::default());

    let config = PipelineConfig {
        flush_interval: Duration::from_secs(10),
        ..test_config()
    };
    let pipeline = WritePipeline::spawn(&config, usage_repo.clone(), violation_repo.clone(), dlq);
    let handle = pipeline.handle();

    for n in 0..10 {
        handle.enqueue_usage(usage_log(n));
    }
    handle.enqueue_violation(violation("ev-1")).await;

    drop(handle);
    pipeline.shutdown().await;

    assert_eq!(usage_repo.logs.lock().await.len(), 10);
    assert_eq!(violation_repo.violations.lock().await.len(), 1);
}

#[tokio::test]
async fn test_usage_dropped_when_queue_full() {
    let usage_repo = Arc::new(RecordingUsageRepo {
        delay: Some(Duration::from_secs(2)),
        ..Default::default()
    });
    let violation_repo = Arc::new(RecordingViolationRepo::default());
    let dlq = Arc::new(MemoryDlq::default());

    let config = PipelineConfig {
        queue_capacity: 2,
        batch_size: 1,
        flush_interval: Duration::from_millis(10),
        ..test_config()
    };
    let pipeline = WritePipeline::spawn(&config, usage_repo.clone(), violation_repo.clone(), dlq.clone());
    let handle = pipeline.handle();

    // first event occupies the single worker inside the slow insert
    handle.enqueue_usage(usage_log(0));
    tokio::time::sleep(Duration::from_millis(100)).await;

    // fill the queue, then overflow it
    handle.enqueue_usage(usage_log(1));
    handle.enqueue_usage(usage_log(2));
    handle.enqueue_usage(usage_log(3));

    let metrics = handle.metrics();
    assert_eq!(metrics.dropped_usage.load(Ordering::SeqCst), 1);

    // violations on a saturated queue go to the DLQ after the timeout
    handle.enqueue_violation(violation("ev-sat")).await;
    let payloads = dlq.payloads.lock().await;
    assert_eq!(payloads.len(), 1);
    assert!(payloads[0].contains("ev-sat"));
}

#[tokio::test]
async fn test_permanent_violation_failure_dead_letters() {
    let usage_repo = Arc::new(RecordingUsageRepo::default());
    let violation_repo = Arc::new(RecordingViolationRepo {
        fail: true,
        ..Default::default()
    });
    let dlq = Arc::new(MemoryDlq::default());

    let pipeline = WritePipeline::spawn(
        &test_config(),
        usage_repo.clone(),
        violation_repo,
        dlq.clone(),
    );
    let handle = pipeline.handle();

    handle.enqueue_violation(violation("ev-dead")).await;

    // three attempts with 100 ms / 300 ms backoff in between
    tokio::time::sleep(Duration::from_millis(1_500)).await;

    let payloads = dlq.payloads.lock().await;
    assert_eq!(payloads.len(), 1);
    assert!(payloads[0].contains("ev-dead"));
    assert_eq!(handle.metrics().dead_lettered.load(Ordering::SeqCst), 1);

    drop(payloads);
    drop(handle);
    pipeline.shutdown().await;
}
