// Background job runner: scheduler plus a worker pool over the durable
// queue.
//
// The scheduler tick enqueues periodic kinds when their cadence is due
// (deduplicated against open rows, so multiple instances cooperate).
// Workers claim due jobs, dispatch to the task implementations, and
// either complete, reschedule with backoff, or dead-letter the row and
// raise a system_health alert. The worker pool is separate from the
// request path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{error, info, warn};

use crate::core::{AppError, Result};
use crate::modules::alerts::services::{AlertEvaluator, AlertNotifier};
use crate::modules::api_keys::repositories::api_key_repository::ApiKeyRepository;
use crate::modules::alerts::repositories::alert_repository::AlertRepository;
use crate::modules::billing::services::billing_service::{previous_month, BillingService};
use crate::modules::jobs::models::{retry_delay, Job, JobKind};
use crate::modules::jobs::repositories::job_repository::JobRepository;
use crate::modules::ratelimit::limiter::RateLimiter;
use crate::modules::ratelimit::store::FastStore;
use crate::modules::usage::repositories::partitions::months_to_maintain;
use crate::modules::usage::repositories::{UsageLogRepository, ViolationRepository};
use crate::modules::usage::services::usage_sync::flush_usage_deltas;

const SCHEDULER_TICK: Duration = Duration::from_secs(30);
const WORKER_POLL: Duration = Duration::from_secs(5);
const USAGE_RETENTION_DAYS: i64 = 90;
const VIOLATION_RETENTION_DAYS: i64 = 180;
const ALERT_RETENTION_DAYS: i64 = 365;

/// Whether a periodic kind is due for enqueueing, given when it was last
/// enqueued by this scheduler.
pub fn is_due(kind: JobKind, last: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match kind {
        JobKind::AggregateUsage | JobKind::ProcessAlerts | JobKind::SyncCacheWithDb => {
            last.map_or(true, |l| now - l >= chrono::Duration::minutes(5))
        }
        JobKind::CleanupExpired => last.map_or(true, |l| now - l >= chrono::Duration::hours(24)),
        JobKind::GenerateBilling => {
            now.day() == 1
                && last.map_or(true, |l| (l.year(), l.month()) != (now.year(), now.month()))
        }
        JobKind::RateLimitCheck => false,
    }
}

/// Payload for the ad-hoc rate_limit_check job
#[derive(Debug, Serialize, Deserialize)]
pub struct RateLimitCheckPayload {
    pub api_key_id: String,
    #[serde(default)]
    pub identifier: Option<String>,
}

/// Payload for generate_billing; defaults to the previous calendar month
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct GenerateBillingPayload {
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub month: Option<u32>,
}

#[derive(Debug, Default)]
pub struct RunnerMetrics {
    pub jobs_completed: AtomicU64,
    pub jobs_rescheduled: AtomicU64,
    pub jobs_dead: AtomicU64,
    pub keys_aggregated: AtomicU64,
    pub keys_near_limit: AtomicU64,
}

#[derive(Debug, Serialize)]
pub struct RunnerMetricsSnapshot {
    pub jobs_completed: u64,
    pub jobs_rescheduled: u64,
    pub jobs_dead: u64,
    pub keys_aggregated: u64,
    pub keys_near_limit: u64,
}

impl RunnerMetrics {
    pub fn snapshot(&self) -> RunnerMetricsSnapshot {
        RunnerMetricsSnapshot {
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            jobs_rescheduled: self.jobs_rescheduled.load(Ordering::Relaxed),
            jobs_dead: self.jobs_dead.load(Ordering::Relaxed),
            keys_aggregated: self.keys_aggregated.load(Ordering::Relaxed),
            keys_near_limit: self.keys_near_limit.load(Ordering::Relaxed),
        }
    }
}

pub struct JobRunner {
    job_repo: Arc<dyn JobRepository>,
    api_key_repo: Arc<dyn ApiKeyRepository>,
    usage_repo: Arc<dyn UsageLogRepository>,
    violation_repo: Arc<dyn ViolationRepository>,
    alert_repo: Arc<dyn AlertRepository>,
    billing_service: Arc<BillingService>,
    alert_evaluator: Arc<AlertEvaluator>,
    alert_notifier: Arc<AlertNotifier>,
    limiter: RateLimiter,
    store: FastStore,
    metrics: Arc<RunnerMetrics>,
    workers: usize,
}

/// Spawned task handles; aborted on shutdown
pub struct RunnerHandles {
    handles: Vec<JoinHandle<()>>,
}

impl RunnerHandles {
    pub fn stop(self) {
        for handle in self.handles {
            handle.abort();
        }
    }
}

impl JobRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        job_repo: Arc<dyn JobRepository>,
        api_key_repo: Arc<dyn ApiKeyRepository>,
        usage_repo: Arc<dyn UsageLogRepository>,
        violation_repo: Arc<dyn ViolationRepository>,
        alert_repo: Arc<dyn AlertRepository>,
        billing_service: Arc<BillingService>,
        alert_evaluator: Arc<AlertEvaluator>,
        alert_notifier: Arc<AlertNotifier>,
        limiter: RateLimiter,
        store: FastStore,
        workers: usize,
    ) -> Self {
        Self {
            job_repo,
            api_key_repo,
            usage_repo,
            violation_repo,
            alert_repo,
            billing_service,
            alert_evaluator,
            alert_notifier,
            limiter,
            store,
            metrics: Arc::new(RunnerMetrics::default()),
            workers: workers.max(1),
        }
    }

    pub fn metrics(&self) -> Arc<RunnerMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Start the scheduler and worker tasks
    pub fn spawn(self: Arc<Self>) -> RunnerHandles {
        let mut handles = Vec::new();

        let scheduler = Arc::clone(&self);
        handles.push(tokio::spawn(async move {
            scheduler.scheduler_loop().await;
        }));

        for worker_id in 0..self.workers {
            let runner = Arc::clone(&self);
            handles.push(tokio::spawn(async move {
                runner.worker_loop(worker_id).await;
            }));
        }

        info!(workers = self.workers, "Background job runner started");
        RunnerHandles { handles }
    }

    async fn scheduler_loop(&self) {
        let mut ticker = interval(SCHEDULER_TICK);
        let mut last_enqueued: HashMap<JobKind, DateTime<Utc>> = HashMap::new();

        loop {
            ticker.tick().await;
            let now = Utc::now();

            for kind in JobKind::PERIODIC {
                if !is_due(kind, last_enqueued.get(&kind).copied(), now) {
                    continue;
                }

                let job = Job::new(kind, serde_json::json!({}), now);
                match self.job_repo.enqueue_if_absent(&job).await {
                    Ok(true) => {
                        last_enqueued.insert(kind, now);
                    }
                    Ok(false) => {
                        // Another instance already has an open row; count
                        // the cadence as satisfied.
                        last_enqueued.insert(kind, now);
                    }
                    Err(e) => {
                        error!(kind = %kind, error = %e, "Failed to enqueue periodic job");
                    }
                }
            }
        }
    }

    async fn worker_loop(&self, worker_id: usize) {
        let mut ticker = interval(WORKER_POLL);

        loop {
            ticker.tick().await;

            // Drain everything due before going back to sleep
            loop {
                let job = match self.job_repo.claim_due(Utc::now()).await {
                    Ok(Some(job)) => job,
                    Ok(None) => break,
                    Err(e) => {
                        error!(worker_id, error = %e, "Failed to claim job");
                        break;
                    }
                };

                let kind = job.kind;
                match self.execute(&job).await {
                    Ok(()) => {
                        if let Err(e) = self.job_repo.complete(&job.id).await {
                            error!(job_id = %job.id, error = %e, "Failed to mark job completed");
                        }
                        self.metrics.jobs_completed.fetch_add(1, Ordering::Relaxed);
                        info!(worker_id, kind = %kind, job_id = %job.id, "Job completed");
                    }
                    Err(e) => self.handle_failure(&job, e).await,
                }
            }
        }
    }

    async fn handle_failure(&self, job: &Job, error: AppError) {
        if job.attempts >= job.max_attempts {
            error!(job_id = %job.id, kind = %job.kind, error = %error, "Job failed permanently");
            if let Err(e) = self.job_repo.mark_dead(&job.id, &error.to_string()).await {
                error!(job_id = %job.id, error = %e, "Failed to dead-letter job");
            }
            self.metrics.jobs_dead.fetch_add(1, Ordering::Relaxed);

            let message = format!(
                "Background task '{}' exhausted {} attempts: {}",
                job.kind, job.max_attempts, error
            );
            if let Err(e) = self
                .alert_evaluator
                .raise_system_health("Background task failed", &message)
                .await
            {
                error!(error = %e, "Failed to raise system_health alert");
            }
            return;
        }

        let delay = retry_delay(job.attempts);
        warn!(
            job_id = %job.id,
            kind = %job.kind,
            attempt = job.attempts,
            retry_in_seconds = delay.num_seconds(),
            error = %error,
            "Job failed, rescheduling"
        );
        if let Err(e) = self
            .job_repo
            .reschedule(&job.id, Utc::now() + delay, &error.to_string())
            .await
        {
            error!(job_id = %job.id, error = %e, "Failed to reschedule job");
        }
        self.metrics.jobs_rescheduled.fetch_add(1, Ordering::Relaxed);
    }

    async fn execute(&self, job: &Job) -> Result<()> {
        match job.kind {
            JobKind::AggregateUsage => self.task_aggregate_usage().await,
            JobKind::GenerateBilling => self.task_generate_billing(&job.payload).await,
            JobKind::ProcessAlerts => self.task_process_alerts().await,
            JobKind::CleanupExpired => self.task_cleanup_expired().await,
            JobKind::SyncCacheWithDb => self.task_sync_cache_with_db().await,
            JobKind::RateLimitCheck => self.task_rate_limit_check(&job.payload).await,
        }
    }

    /// Read each active key's window state from the fast store and emit
    /// usage-vs-limit metrics.
    async fn task_aggregate_usage(&self) -> Result<()> {
        let keys = self.api_key_repo.active_keys().await?;
        let mut near_limit = 0u64;

        for key in &keys {
            let state = self
                .limiter
                .peek(&key.id, key.rate_limit, key.rate_window, key.burst)
                .await?;
            let used = (key.rate_limit - state.remaining).max(0);
            let ratio = used as f64 / key.rate_limit as f64;

            if ratio >= 0.8 {
                near_limit += 1;
            }
            info!(
                api_key_id = %key.id,
                used,
                limit = key.rate_limit,
                ratio = format!("{:.2}", ratio),
                "Window usage aggregated"
            );
        }

        self.metrics
            .keys_aggregated
            .fetch_add(keys.len() as u64, Ordering::Relaxed);
        self.metrics
            .keys_near_limit
            .store(near_limit, Ordering::Relaxed);
        Ok(())
    }

    async fn task_generate_billing(&self, payload: &serde_json::Value) -> Result<()> {
        let payload: GenerateBillingPayload = serde_json::from_value(payload.clone())?;
        let (year, month) = match (payload.year, payload.month) {
            (Some(y), Some(m)) => (y, m),
            _ => previous_month(Utc::now()),
        };

        self.billing_service.generate_for_month(year, month).await?;
        Ok(())
    }

    async fn task_process_alerts(&self) -> Result<()> {
        self.alert_evaluator.run().await?;
        self.alert_notifier.deliver_pending(&self.alert_repo).await?;
        Ok(())
    }

    /// Retention enforcement plus next-month partition pre-creation, so
    /// writes never land around a month boundary without a partition.
    async fn task_cleanup_expired(&self) -> Result<()> {
        let now = Utc::now();
        let today = now.date_naive();

        let usage_cutoff = today - chrono::Duration::days(USAGE_RETENTION_DAYS);
        let dropped_usage = self.usage_repo.drop_expired(usage_cutoff).await?;

        let violation_cutoff = today - chrono::Duration::days(VIOLATION_RETENTION_DAYS);
        let dropped_violations = self.violation_repo.drop_expired(violation_cutoff).await?;

        let alert_cutoff = now - chrono::Duration::days(ALERT_RETENTION_DAYS);
        let deleted_alerts = self.alert_repo.delete_before(alert_cutoff).await?;

        for (year, month) in months_to_maintain(today) {
            self.usage_repo.ensure_partition(year, month).await?;
            self.violation_repo.ensure_partition(year, month).await?;
        }

        self.job_repo
            .prune_completed_before(now - chrono::Duration::days(7))
            .await?;

        info!(
            dropped_usage,
            dropped_violations, deleted_alerts, "Expired data cleaned up"
        );
        Ok(())
    }

    async fn task_sync_cache_with_db(&self) -> Result<()> {
        let flushed = flush_usage_deltas(&self.store, &*self.api_key_repo).await?;
        if flushed > 0 {
            info!(flushed, "Fast-store usage deltas reconciled into durable store");
        }
        Ok(())
    }

    /// Ad-hoc recomputation of a key's current state, without consuming
    async fn task_rate_limit_check(&self, payload: &serde_json::Value) -> Result<()> {
        let payload: RateLimitCheckPayload = serde_json::from_value(payload.clone())?;

        let key = self
            .api_key_repo
            .find_by_id(&payload.api_key_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("API key {}", payload.api_key_id)))?;

        let counter_key = match &payload.identifier {
            Some(id) => format!("{}:{}", key.id, id),
            None => key.id.clone(),
        };

        let state = self
            .limiter
            .peek(&counter_key, key.rate_limit, key.rate_window, key.burst)
            .await?;

        info!(
            api_key_id = %key.id,
            counter_key = %counter_key,
            allowed = state.allowed,
            remaining = state.remaining,
            reset_at = state.reset_at,
            "Rate limit check"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_five_minute_cadence() {
        let now = Utc.with_ymd_and_hms(2026, 8, 2, 12, 0, 0).unwrap();
        assert!(is_due(JobKind::AggregateUsage, None, now));
        assert!(!is_due(
            JobKind::AggregateUsage,
            Some(now - chrono::Duration::minutes(3)),
            now
        ));
        assert!(is_due(
            JobKind::AggregateUsage,
            Some(now - chrono::Duration::minutes(5)),
            now
        ));
    }

    #[test]
    fn test_daily_cadence() {
        let now = Utc.with_ymd_and_hms(2026, 8, 2, 12, 0, 0).unwrap();
        assert!(!is_due(
            JobKind::CleanupExpired,
            Some(now - chrono::Duration::hours(23)),
            now
        ));
        assert!(is_due(
            JobKind::CleanupExpired,
            Some(now - chrono::Duration::hours(24)),
            now
        ));
    }

    #[test]
    fn test_billing_only_on_first_of_month() {
        let mid_month = Utc.with_ymd_and_hms(2026, 8, 15, 0, 10, 0).unwrap();
        assert!(!is_due(JobKind::GenerateBilling, None, mid_month));

        let first = Utc.with_ymd_and_hms(2026, 8, 1, 0, 10, 0).unwrap();
        assert!(is_due(JobKind::GenerateBilling, None, first));

        // already enqueued this month
        assert!(!is_due(
            JobKind::GenerateBilling,
            Some(first - chrono::Duration::minutes(30)),
            first
        ));

        // last ran on July 1st, due again on August 1st
        let july_first = Utc.with_ymd_and_hms(2026, 7, 1, 0, 5, 0).unwrap();
        assert!(is_due(JobKind::GenerateBilling, Some(july_first), first));
    }

    #[test]
    fn test_ad_hoc_kind_never_scheduled() {
        let now = Utc::now();
        assert!(!is_due(JobKind::RateLimitCheck, None, now));
    }
}
