// MySQL CRUD for API keys.
//
// The durable store is authoritative for key metadata. Reads on the
// decision path go through the metadata cache; everything here is either
// admin-path or background-path. Soft-deleted rows are invisible to
// hash lookups but remain for billing history.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{MySql, Pool};

use crate::core::{AppError, Result};
use crate::modules::api_keys::models::{ApiKey, KeyStatus};

/// Repository trait for API key operations
#[async_trait]
pub trait ApiKeyRepository: Send + Sync {
    /// Persist a freshly issued key
    async fn create(&self, key: &ApiKey) -> Result<()>;

    /// Find by ID, including soft-deleted rows
    async fn find_by_id(&self, id: &str) -> Result<Option<ApiKey>>;

    /// Find a live (non-deleted) key by its hash. This is the cache-miss
    /// path of the decision engine.
    async fn find_by_key_hash(&self, key_hash: &str) -> Result<Option<ApiKey>>;

    /// List non-deleted keys with pagination
    async fn list(&self, limit: u32, offset: u32) -> Result<Vec<ApiKey>>;

    /// All keys currently eligible for decisions (active, not deleted)
    async fn active_keys(&self) -> Result<Vec<ApiKey>>;

    /// Every key including soft-deleted ones; billing still owes periods
    /// that ended after a deletion
    async fn all_keys(&self) -> Result<Vec<ApiKey>>;

    /// Update mutable settings (name, limits, metadata)
    async fn update_settings(&self, key: &ApiKey) -> Result<()>;

    /// Transition key status
    async fn set_status(&self, id: &str, status: KeyStatus) -> Result<()>;

    /// Swap in a new hash after rotation
    async fn update_key_hash(&self, id: &str, key_hash: &str) -> Result<()>;

    /// Soft-delete; the row stays for billing history
    async fn soft_delete(&self, id: &str) -> Result<()>;

    /// Fold a usage delta into the lifetime counter. Called by the
    /// reconciliation tasks, never on the decision path.
    async fn increment_total_usage(
        &self,
        id: &str,
        delta: i64,
        seen_at: DateTime<Utc>,
    ) -> Result<()>;
}

/// MySQL implementation of ApiKeyRepository
pub struct MySqlApiKeyRepository {
    pool: Pool<MySql>,
}

impl MySqlApiKeyRepository {
    pub fn new(pool: Pool<MySql>) -> Self {
        Self { pool }
    }
}

const SELECT_COLUMNS: &str = r#"
    id, key_hash, name, tier, status, rate_limit, rate_window, burst,
    total_usage, last_used_at, metadata, created_at, updated_at, deleted_at
"#;

#[async_trait]
impl ApiKeyRepository for MySqlApiKeyRepository {
    async fn create(&self, key: &ApiKey) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO api_keys (
                id, key_hash, name, tier, status, rate_limit, rate_window, burst,
                total_usage, last_used_at, metadata, created_at, updated_at, deleted_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&key.id)
        .bind(&key.key_hash)
        .bind(&key.name)
        .bind(key.tier)
        .bind(key.status)
        .bind(key.rate_limit)
        .bind(key.rate_window)
        .bind(key.burst)
        .bind(key.total_usage)
        .bind(key.last_used_at)
        .bind(serde_json::to_string(&key.metadata)?)
        .bind(key.created_at)
        .bind(key.updated_at)
        .bind(key.deleted_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let Some(db_err) = e.as_database_error() {
                if db_err.is_unique_violation() {
                    return AppError::validation("API key hash collision, retry the operation");
                }
            }
            AppError::Database(e)
        })?;

        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<ApiKey>> {
        let key = sqlx::query_as::<_, ApiKey>(&format!(
            "SELECT {} FROM api_keys WHERE id = ?",
            SELECT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(key)
    }

    async fn find_by_key_hash(&self, key_hash: &str) -> Result<Option<ApiKey>> {
        let key = sqlx::query_as::<_, ApiKey>(&format!(
            "SELECT {} FROM api_keys WHERE key_hash = ? AND deleted_at IS NULL",
            SELECT_COLUMNS
        ))
        .bind(key_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(key)
    }

    async fn list(&self, limit: u32, offset: u32) -> Result<Vec<ApiKey>> {
        let keys = sqlx::query_as::<_, ApiKey>(&format!(
            "SELECT {} FROM api_keys WHERE deleted_at IS NULL ORDER BY created_at DESC LIMIT ? OFFSET ?",
            SELECT_COLUMNS
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(keys)
    }

    async fn active_keys(&self) -> Result<Vec<ApiKey>> {
        let keys = sqlx::query_as::<_, ApiKey>(&format!(
            "SELECT {} FROM api_keys WHERE status = 'active' AND deleted_at IS NULL",
            SELECT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(keys)
    }

    async fn all_keys(&self) -> Result<Vec<ApiKey>> {
        let keys = sqlx::query_as::<_, ApiKey>(&format!("SELECT {} FROM api_keys", SELECT_COLUMNS))
            .fetch_all(&self.pool)
            .await?;

        Ok(keys)
    }

    async fn update_settings(&self, key: &ApiKey) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE api_keys
            SET name = ?, tier = ?, rate_limit = ?, rate_window = ?, burst = ?,
                metadata = ?, updated_at = ?
            WHERE id = ? AND deleted_at IS NULL
            "#,
        )
        .bind(&key.name)
        .bind(key.tier)
        .bind(key.rate_limit)
        .bind(key.rate_window)
        .bind(key.burst)
        .bind(serde_json::to_string(&key.metadata)?)
        .bind(Utc::now())
        .bind(&key.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found(format!("API key {}", key.id)));
        }

        Ok(())
    }

    async fn set_status(&self, id: &str, status: KeyStatus) -> Result<()> {
        let result =
            sqlx::query("UPDATE api_keys SET status = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL")
                .bind(status)
                .bind(Utc::now())
                .bind(id)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found(format!("API key {}", id)));
        }

        Ok(())
    }

    async fn update_key_hash(&self, id: &str, key_hash: &str) -> Result<()> {
        let result =
            sqlx::query("UPDATE api_keys SET key_hash = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL")
                .bind(key_hash)
                .bind(Utc::now())
                .bind(id)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found(format!("API key {}", id)));
        }

        Ok(())
    }

    async fn soft_delete(&self, id: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE api_keys SET deleted_at = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(Utc::now())
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found(format!("API key {}", id)));
        }

        Ok(())
    }

    async fn increment_total_usage(
        &self,
        id: &str,
        delta: i64,
        seen_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE api_keys
            SET total_usage = total_usage + ?, last_used_at = ?
            WHERE id = ?
            "#,
        )
        .bind(delta)
        .bind(seen_at)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
