// The decision engine: cache resolve, atomic counter consume, async
// persistence hand-off.
//
// The only public operation is validate(). It suspends twice, once on
// the metadata cache and once on the counter script; everything else is
// fire-and-forget into the write pipeline. A dropped validate future
// enqueues nothing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::core::{AppError, Result};
use crate::modules::api_keys::models::ApiKey;
use crate::modules::ratelimit::cache::MetadataCache;
use crate::modules::ratelimit::limiter::{RateLimitOutcome, RateLimiter};
use crate::modules::ratelimit::store::FastStore;
use crate::modules::usage::models::{RateLimitViolation, RequestContext, UsageLog};
use crate::modules::usage::pipeline::PipelineHandle;
use crate::modules::usage::services::usage_sync::delta_key;

/// Budget for the single retry after a fast-store failure
const RETRY_BUDGET: Duration = Duration::from_millis(20);

/// TTL for the per-counter violation streak
const VIOLATION_STREAK_TTL: Duration = Duration::from_secs(24 * 3600);

/// TTL safety net on usage-delta buffers; reconciliation drains them long
/// before this expires
const USAGE_DELTA_TTL: Duration = Duration::from_secs(24 * 3600);

/// Outcome of a validate call
#[derive(Debug, Clone)]
pub struct Decision {
    pub allowed: bool,
    pub limit: i64,
    pub remaining: i64,
    pub reset_at: DateTime<Utc>,
    /// Seconds until a retry can succeed; zero when allowed
    pub retry_after: i64,
    /// True when the fast store was unavailable and fail-open applied
    pub degraded: bool,
    /// True when a violation event was handed to the pipeline
    pub violation_recorded: bool,
}

/// Decision counters surfaced through the metrics endpoint
#[derive(Debug, Default)]
pub struct EngineMetrics {
    pub allowed: AtomicU64,
    pub denied: AtomicU64,
    pub degraded_allowed: AtomicU64,
    pub rejected_invalid: AtomicU64,
    pub rejected_disabled: AtomicU64,
}

#[derive(Debug, Serialize)]
pub struct EngineMetricsSnapshot {
    pub allowed: u64,
    pub denied: u64,
    pub degraded_allowed: u64,
    pub rejected_invalid: u64,
    pub rejected_disabled: u64,
}

impl EngineMetrics {
    pub fn snapshot(&self) -> EngineMetricsSnapshot {
        EngineMetricsSnapshot {
            allowed: self.allowed.load(Ordering::Relaxed),
            denied: self.denied.load(Ordering::Relaxed),
            degraded_allowed: self.degraded_allowed.load(Ordering::Relaxed),
            rejected_invalid: self.rejected_invalid.load(Ordering::Relaxed),
            rejected_disabled: self.rejected_disabled.load(Ordering::Relaxed),
        }
    }
}

pub struct DecisionEngine {
    cache: MetadataCache,
    limiter: RateLimiter,
    pipeline: PipelineHandle,
    store: FastStore,
    fail_open: bool,
    metrics: Arc<EngineMetrics>,
}

impl DecisionEngine {
    pub fn new(
        cache: MetadataCache,
        limiter: RateLimiter,
        pipeline: PipelineHandle,
        store: FastStore,
        fail_open: bool,
    ) -> Self {
        Self {
            cache,
            limiter,
            pipeline,
            store,
            fail_open,
            metrics: Arc::new(EngineMetrics::default()),
        }
    }

    pub fn metrics(&self) -> Arc<EngineMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Validate one request against a key's limit, consuming `cost` slots.
    /// The optional identifier scopes the counter to a sub-user of the key.
    pub async fn validate(
        &self,
        api_key_plaintext: &str,
        identifier: Option<&str>,
        cost: i64,
        ctx: &RequestContext,
    ) -> Result<Decision> {
        let started = Instant::now();

        let key_hash = ApiKey::hash(api_key_plaintext);
        let api_key = match self.cache.get(&key_hash).await {
            Ok(Some(key)) => key,
            Ok(None) => {
                self.metrics.rejected_invalid.fetch_add(1, Ordering::Relaxed);
                return Err(AppError::InvalidKey);
            }
            // Cache miss plus an unreachable durable store: the key cannot
            // be resolved at all, so the request is degraded, not invalid.
            Err(AppError::Database(e)) => {
                return Err(AppError::ServiceDegraded(e.to_string()));
            }
            Err(e) => return Err(e),
        };

        if !api_key.is_active() {
            self.metrics.rejected_disabled.fetch_add(1, Ordering::Relaxed);
            return Err(AppError::KeyDisabled(api_key.status.to_string()));
        }

        let counter_key = match identifier {
            Some(id) => format!("{}:{}", api_key.id, id),
            None => api_key.id.clone(),
        };

        let outcome = match self.consume(&counter_key, &api_key, cost).await {
            Ok(outcome) => outcome,
            Err(e) => return self.degraded_decision(&api_key, ctx, e),
        };

        let now = Utc::now();
        let reset_at = Utc
            .timestamp_opt(outcome.reset_at, 0)
            .single()
            .unwrap_or(now);

        if outcome.allowed {
            self.metrics.allowed.fetch_add(1, Ordering::Relaxed);

            // Buffer the usage count; the reconciliation task folds it
            // into api_keys.total_usage. Best-effort: the decision stands
            // even if the buffer write fails.
            let _ = self
                .store
                .incr_by_expire(&delta_key(&api_key.id), cost, USAGE_DELTA_TTL)
                .await;

            self.pipeline.enqueue_usage(UsageLog {
                api_key_id: api_key.id.clone(),
                endpoint: ctx.endpoint.clone(),
                method: ctx.method.clone(),
                status_code: 200,
                response_time_ms: started.elapsed().as_millis() as i64,
                request_bytes: ctx.request_bytes,
                response_bytes: 0,
                ip: ctx.client_ip.clone(),
                country: ctx.country.clone(),
                timestamp: now,
            });

            return Ok(Decision {
                allowed: true,
                limit: api_key.rate_limit,
                remaining: outcome.remaining,
                reset_at,
                retry_after: 0,
                degraded: false,
                violation_recorded: false,
            });
        }

        self.metrics.denied.fetch_add(1, Ordering::Relaxed);
        debug!(
            request_id = ctx.request_id.as_deref().unwrap_or("-"),
            api_key_id = %api_key.id,
            counter_key = %counter_key,
            retry_after = outcome.reset_at - now.timestamp(),
            "Request denied by rate limit"
        );

        // Streak counter drives is_repeated; best-effort, a denial is
        // recorded either way.
        let streak = self
            .store
            .incr_by_expire(
                &format!("rl:viol:{}", counter_key),
                1,
                VIOLATION_STREAK_TTL,
            )
            .await
            .unwrap_or(1);

        self.pipeline
            .enqueue_violation(RateLimitViolation {
                event_id: RateLimitViolation::new_event_id(),
                api_key_id: api_key.id.clone(),
                endpoint: ctx.endpoint.clone(),
                method: ctx.method.clone(),
                client_ip: ctx.client_ip.clone(),
                limit: api_key.rate_limit,
                window: api_key.rate_window,
                current_count: api_key.rate_limit - outcome.remaining,
                tier: api_key.tier,
                is_repeated: streak > 1,
                violation_count: streak,
                processed_at: now,
            })
            .await;

        Ok(Decision {
            allowed: false,
            limit: api_key.rate_limit,
            remaining: 0,
            reset_at,
            retry_after: (outcome.reset_at - now.timestamp()).max(0),
            degraded: false,
            violation_recorded: true,
        })
    }

    /// Counter consume with a single bounded retry on transport failure
    async fn consume(
        &self,
        counter_key: &str,
        api_key: &ApiKey,
        cost: i64,
    ) -> Result<RateLimitOutcome> {
        let first = self
            .limiter
            .check(
                counter_key,
                api_key.rate_limit,
                api_key.rate_window,
                api_key.burst,
                cost,
            )
            .await;

        match first {
            Ok(outcome) => Ok(outcome),
            Err(AppError::FastStore(first_err)) => {
                let retry = tokio::time::timeout(
                    RETRY_BUDGET,
                    self.limiter.check(
                        counter_key,
                        api_key.rate_limit,
                        api_key.rate_window,
                        api_key.burst,
                        cost,
                    ),
                )
                .await;

                match retry {
                    Ok(Ok(outcome)) => Ok(outcome),
                    Ok(Err(e)) => Err(e),
                    Err(_) => Err(AppError::FastStore(first_err)),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Fast store unreachable: allow with the degraded flag when
    /// configured, otherwise surface ServiceDegraded. No violation is
    /// recorded either way, since the counter state is unknown.
    fn degraded_decision(
        &self,
        api_key: &ApiKey,
        ctx: &RequestContext,
        cause: AppError,
    ) -> Result<Decision> {
        if !self.fail_open {
            return Err(AppError::ServiceDegraded(cause.to_string()));
        }

        warn!(
            request_id = ctx.request_id.as_deref().unwrap_or("-"),
            api_key_id = %api_key.id,
            error = %cause,
            "Fast store unavailable, failing open"
        );
        self.metrics.degraded_allowed.fetch_add(1, Ordering::Relaxed);

        let now = Utc::now();
        Ok(Decision {
            allowed: true,
            limit: api_key.rate_limit,
            remaining: api_key.rate_limit,
            reset_at: now + chrono::Duration::seconds(api_key.rate_window),
            retry_after: 0,
            degraded: true,
            violation_recorded: false,
        })
    }
}
