use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Alert category. `system_health` alerts have no api_key_id; they are
/// raised by the job runner when a background task dies permanently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR(30)", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    UsageThreshold,
    ViolationSpike,
    SystemHealth,
}

impl std::fmt::Display for AlertType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertType::UsageThreshold => write!(f, "usage_threshold"),
            AlertType::ViolationSpike => write!(f, "violation_spike"),
            AlertType::SystemHealth => write!(f, "system_health"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR(20)", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR(20)", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Active,
    Resolved,
    Suppressed,
}

/// A rule evaluation outcome. Retained 365 days; transitions
/// active -> resolved when the condition clears.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Alert {
    pub id: String,
    pub api_key_id: Option<String>,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub status: AlertStatus,
    pub title: String,
    pub message: String,
    pub threshold: f64,
    pub current_value: f64,
    pub triggered_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    /// Webhook delivery marker; null until the notifier succeeds
    pub sent_at: Option<DateTime<Utc>>,
}

impl Alert {
    pub fn new(
        api_key_id: Option<String>,
        alert_type: AlertType,
        severity: AlertSeverity,
        title: String,
        message: String,
        threshold: f64,
        current_value: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            api_key_id,
            alert_type,
            severity,
            status: AlertStatus::Active,
            title,
            message,
            threshold,
            current_value,
            triggered_at: Utc::now(),
            resolved_at: None,
            sent_at: None,
        }
    }
}
