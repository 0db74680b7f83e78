use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{MySql, Pool};

use crate::core::Result;
use crate::modules::alerts::models::{Alert, AlertType};

#[async_trait]
pub trait AlertRepository: Send + Sync {
    async fn insert(&self, alert: &Alert) -> Result<()>;

    /// Active alert of a type for a key (or the keyless system alert)
    async fn find_active(
        &self,
        api_key_id: Option<&str>,
        alert_type: AlertType,
    ) -> Result<Option<Alert>>;

    async fn resolve(&self, id: &str) -> Result<()>;

    /// Active alerts not yet delivered to the webhook
    async fn unsent_active(&self) -> Result<Vec<Alert>>;

    async fn mark_sent(&self, id: &str) -> Result<()>;

    /// Retention: delete alerts triggered before `cutoff`
    async fn delete_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

pub struct MySqlAlertRepository {
    pool: Pool<MySql>,
}

impl MySqlAlertRepository {
    pub fn new(pool: Pool<MySql>) -> Self {
        Self { pool }
    }
}

const SELECT_COLUMNS: &str = r#"
    id, api_key_id, alert_type, severity, status, title, message,
    threshold, current_value, triggered_at, resolved_at, sent_at
"#;

#[async_trait]
impl AlertRepository for MySqlAlertRepository {
    async fn insert(&self, alert: &Alert) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO alerts (
                id, api_key_id, alert_type, severity, status, title, message,
                threshold, current_value, triggered_at, resolved_at, sent_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&alert.id)
        .bind(&alert.api_key_id)
        .bind(alert.alert_type)
        .bind(alert.severity)
        .bind(alert.status)
        .bind(&alert.title)
        .bind(&alert.message)
        .bind(alert.threshold)
        .bind(alert.current_value)
        .bind(alert.triggered_at)
        .bind(alert.resolved_at)
        .bind(alert.sent_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_active(
        &self,
        api_key_id: Option<&str>,
        alert_type: AlertType,
    ) -> Result<Option<Alert>> {
        let alert = match api_key_id {
            Some(id) => {
                sqlx::query_as::<_, Alert>(&format!(
                    "SELECT {} FROM alerts WHERE api_key_id = ? AND alert_type = ? AND status = 'active' LIMIT 1",
                    SELECT_COLUMNS
                ))
                .bind(id)
                .bind(alert_type)
                .fetch_optional(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, Alert>(&format!(
                    "SELECT {} FROM alerts WHERE api_key_id IS NULL AND alert_type = ? AND status = 'active' LIMIT 1",
                    SELECT_COLUMNS
                ))
                .bind(alert_type)
                .fetch_optional(&self.pool)
                .await?
            }
        };

        Ok(alert)
    }

    async fn resolve(&self, id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE alerts SET status = 'resolved', resolved_at = ? WHERE id = ? AND status = 'active'",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn unsent_active(&self) -> Result<Vec<Alert>> {
        let alerts = sqlx::query_as::<_, Alert>(&format!(
            "SELECT {} FROM alerts WHERE status = 'active' AND sent_at IS NULL ORDER BY triggered_at",
            SELECT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(alerts)
    }

    async fn mark_sent(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE alerts SET sent_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn delete_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM alerts WHERE triggered_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
