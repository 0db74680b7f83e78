// Tenant-scoped key management.
//
// Every mutation invalidates the metadata cache for the affected hashes
// so the decision path observes the change within one cache round-trip;
// rotation invalidates both the old and the new hash.

use std::sync::Arc;

use tracing::info;

use crate::core::{AppError, Result};
use crate::modules::api_keys::models::{ApiKey, KeyStatus, Tier};
use crate::modules::api_keys::repositories::api_key_repository::ApiKeyRepository;
use crate::modules::ratelimit::cache::MetadataCache;
use crate::modules::usage::models::{RateLimitViolation, UsageLog};
use crate::modules::usage::repositories::{UsageLogRepository, ViolationRepository};

pub struct ApiKeyService {
    repo: Arc<dyn ApiKeyRepository>,
    usage_repo: Arc<dyn UsageLogRepository>,
    violation_repo: Arc<dyn ViolationRepository>,
    cache: MetadataCache,
    /// Environment tag baked into issued plaintext keys
    env: String,
}

/// Field updates accepted by the admin update endpoint. Absent fields are
/// left unchanged.
#[derive(Debug, Default)]
pub struct KeyUpdate {
    pub name: Option<String>,
    pub tier: Option<Tier>,
    pub status: Option<KeyStatus>,
    pub rate_limit: Option<i64>,
    pub rate_window: Option<i64>,
    pub burst: Option<i64>,
    pub metadata: Option<serde_json::Value>,
}

impl ApiKeyService {
    pub fn new(
        repo: Arc<dyn ApiKeyRepository>,
        usage_repo: Arc<dyn UsageLogRepository>,
        violation_repo: Arc<dyn ViolationRepository>,
        cache: MetadataCache,
        env: String,
    ) -> Self {
        Self {
            repo,
            usage_repo,
            violation_repo,
            cache,
            env,
        }
    }

    /// Issue a new key. The plaintext is returned exactly once.
    pub async fn create(
        &self,
        name: String,
        tier: Tier,
        rate_limit: Option<i64>,
        rate_window: Option<i64>,
        burst: Option<i64>,
        metadata: Option<serde_json::Value>,
    ) -> Result<(ApiKey, String)> {
        let (mut key, plaintext) =
            ApiKey::issue(name, tier, &self.env, rate_limit, rate_window, metadata)?;
        key.burst = burst;
        self.repo.create(&key).await?;

        info!(api_key_id = %key.id, tier = %key.tier, "API key created");
        Ok((key, plaintext))
    }

    pub async fn get(&self, id: &str) -> Result<ApiKey> {
        self.repo
            .find_by_id(id)
            .await?
            .filter(|key| key.deleted_at.is_none())
            .ok_or_else(|| AppError::not_found(format!("API key {}", id)))
    }

    pub async fn list(&self, limit: u32, offset: u32) -> Result<Vec<ApiKey>> {
        self.repo.list(limit.min(200), offset).await
    }

    /// Apply field updates and drop the stale cache entry.
    pub async fn update(&self, id: &str, update: KeyUpdate) -> Result<ApiKey> {
        let mut key = self.get(id).await?;

        if let Some(name) = update.name {
            key.name = name;
        }
        if let Some(tier) = update.tier {
            key.tier = tier;
        }
        if let Some(rate_limit) = update.rate_limit {
            if rate_limit < 1 {
                return Err(AppError::validation("rate_limit must be at least 1"));
            }
            key.rate_limit = rate_limit;
        }
        if let Some(rate_window) = update.rate_window {
            if rate_window < 1 {
                return Err(AppError::validation("rate_window must be at least 1 second"));
            }
            key.rate_window = rate_window;
        }
        if let Some(burst) = update.burst {
            key.burst = Some(burst);
        }
        if let Some(metadata) = update.metadata {
            key.metadata = metadata;
        }

        self.repo.update_settings(&key).await?;

        if let Some(status) = update.status {
            self.repo.set_status(id, status).await?;
            key.status = status;
        }

        self.cache.invalidate(&[key.key_hash.as_str()]).await?;

        info!(api_key_id = %id, "API key updated");
        self.get(id).await
    }

    /// Swap in a fresh plaintext. The old plaintext stops resolving as
    /// soon as both cache entries are invalidated.
    pub async fn rotate(&self, id: &str) -> Result<(ApiKey, String)> {
        let mut key = self.get(id).await?;
        let old_hash = key.key_hash.clone();

        let plaintext = key.rotate(&self.env);
        self.repo.update_key_hash(id, &key.key_hash).await?;

        self.cache
            .invalidate(&[old_hash.as_str(), key.key_hash.as_str()])
            .await?;

        info!(api_key_id = %id, "API key rotated");
        Ok((key, plaintext))
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        let key = self.get(id).await?;
        self.repo.soft_delete(id).await?;
        self.cache.invalidate(&[key.key_hash.as_str()]).await?;

        info!(api_key_id = %id, "API key deleted");
        Ok(())
    }

    pub async fn usage_history(&self, id: &str, limit: u32) -> Result<Vec<UsageLog>> {
        // 404 for unknown keys instead of an empty list
        self.get(id).await?;
        self.usage_repo.recent_for_key(id, limit.min(1_000)).await
    }

    pub async fn violation_history(
        &self,
        id: &str,
        limit: u32,
    ) -> Result<Vec<RateLimitViolation>> {
        self.get(id).await?;
        self.violation_repo.recent_for_key(id, limit.min(1_000)).await
    }
}
