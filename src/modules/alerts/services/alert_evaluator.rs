// Built-in alert rule evaluation.
//
// Two per-key rules run on the 5-minute cadence: window usage against the
// key's limit (80% warning, 95% critical) and a violation spike over a
// 5-minute lookback. An active alert of the same type suppresses
// re-creation; it resolves once the condition clears. system_health
// alerts come from the job runner, not from rules here.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use tracing::{info, warn};

use crate::core::Result;
use crate::modules::alerts::models::{Alert, AlertSeverity, AlertType};
use crate::modules::alerts::repositories::alert_repository::AlertRepository;
use crate::modules::api_keys::repositories::api_key_repository::ApiKeyRepository;
use crate::modules::ratelimit::limiter::RateLimiter;
use crate::modules::usage::repositories::ViolationRepository;

const USAGE_WARNING_RATIO: f64 = 0.80;
const USAGE_CRITICAL_RATIO: f64 = 0.95;
const SPIKE_LOOKBACK_MINUTES: i64 = 5;
const SPIKE_THRESHOLD: i64 = 100;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct EvaluationSummary {
    pub created: u64,
    pub resolved: u64,
}

pub struct AlertEvaluator {
    api_key_repo: Arc<dyn ApiKeyRepository>,
    violation_repo: Arc<dyn ViolationRepository>,
    alert_repo: Arc<dyn AlertRepository>,
    limiter: RateLimiter,
}

impl AlertEvaluator {
    pub fn new(
        api_key_repo: Arc<dyn ApiKeyRepository>,
        violation_repo: Arc<dyn ViolationRepository>,
        alert_repo: Arc<dyn AlertRepository>,
        limiter: RateLimiter,
    ) -> Self {
        Self {
            api_key_repo,
            violation_repo,
            alert_repo,
            limiter,
        }
    }

    /// Evaluate all rules over all active keys
    pub async fn run(&self) -> Result<EvaluationSummary> {
        let mut summary = EvaluationSummary::default();
        let keys = self.api_key_repo.active_keys().await?;

        // usage_threshold over the current window state
        for key in &keys {
            let state = match self
                .limiter
                .peek(&key.id, key.rate_limit, key.rate_window, key.burst)
                .await
            {
                Ok(state) => state,
                Err(e) => {
                    warn!(api_key_id = %key.id, error = %e, "Skipping usage rule, fast store unreadable");
                    continue;
                }
            };

            let used = (key.rate_limit - state.remaining).max(0);
            let ratio = used as f64 / key.rate_limit as f64;
            let existing = self
                .alert_repo
                .find_active(Some(&key.id), AlertType::UsageThreshold)
                .await?;

            if ratio >= USAGE_WARNING_RATIO {
                if existing.is_none() {
                    let severity = if ratio >= USAGE_CRITICAL_RATIO {
                        AlertSeverity::Critical
                    } else {
                        AlertSeverity::Warning
                    };
                    let alert = Alert::new(
                        Some(key.id.clone()),
                        AlertType::UsageThreshold,
                        severity,
                        format!("Usage at {:.0}% of limit", ratio * 100.0),
                        format!(
                            "Key '{}' has used {} of {} requests in the current window",
                            key.name, used, key.rate_limit
                        ),
                        USAGE_WARNING_RATIO,
                        ratio,
                    );
                    self.alert_repo.insert(&alert).await?;
                    summary.created += 1;
                }
            } else if let Some(alert) = existing {
                self.alert_repo.resolve(&alert.id).await?;
                summary.resolved += 1;
            }
        }

        // violation_spike over the recent lookback
        let since = Utc::now() - ChronoDuration::minutes(SPIKE_LOOKBACK_MINUTES);
        let counts = self.violation_repo.counts_since(since).await?;

        for key in &keys {
            let count = counts
                .iter()
                .find(|(id, _)| id == &key.id)
                .map(|(_, n)| *n)
                .unwrap_or(0);
            let existing = self
                .alert_repo
                .find_active(Some(&key.id), AlertType::ViolationSpike)
                .await?;

            if count >= SPIKE_THRESHOLD {
                if existing.is_none() {
                    let alert = Alert::new(
                        Some(key.id.clone()),
                        AlertType::ViolationSpike,
                        AlertSeverity::Warning,
                        "Rate limit violation spike".to_string(),
                        format!(
                            "Key '{}' was denied {} times in the last {} minutes",
                            key.name, count, SPIKE_LOOKBACK_MINUTES
                        ),
                        SPIKE_THRESHOLD as f64,
                        count as f64,
                    );
                    self.alert_repo.insert(&alert).await?;
                    summary.created += 1;
                }
            } else if let Some(alert) = existing {
                self.alert_repo.resolve(&alert.id).await?;
                summary.resolved += 1;
            }
        }

        if summary.created > 0 || summary.resolved > 0 {
            info!(
                created = summary.created,
                resolved = summary.resolved,
                "Alert evaluation finished"
            );
        }

        Ok(summary)
    }

    /// Raise (or refresh) the keyless system_health alert. Used by the job
    /// runner when a task dead-letters.
    pub async fn raise_system_health(&self, title: &str, message: &str) -> Result<()> {
        if self
            .alert_repo
            .find_active(None, AlertType::SystemHealth)
            .await?
            .is_some()
        {
            return Ok(());
        }

        let alert = Alert::new(
            None,
            AlertType::SystemHealth,
            AlertSeverity::Critical,
            title.to_string(),
            message.to_string(),
            0.0,
            1.0,
        );
        self.alert_repo.insert(&alert).await
    }
}
