// Read-through metadata cache for API-key records.
//
// Maps `cache:key:{key_hash}` to the serialized record, with a `__MISS__`
// sentinel for negative entries. Refresh after a miss is guarded by a
// best-effort single-flight lock (short-TTL SET NX); losers of the race
// poll the cache briefly and then fall back to a direct durable-store
// read rather than stampeding the refresh.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::core::Result;
use crate::modules::api_keys::models::ApiKey;
use crate::modules::api_keys::repositories::api_key_repository::ApiKeyRepository;
use crate::modules::ratelimit::store::FastStore;

const NEGATIVE_SENTINEL: &str = "__MISS__";
const LOCK_TTL: Duration = Duration::from_secs(3);
const LOCK_WAIT: Duration = Duration::from_millis(100);
const LOCK_POLL: Duration = Duration::from_millis(10);

#[derive(Clone)]
pub struct MetadataCache {
    store: FastStore,
    repo: Arc<dyn ApiKeyRepository>,
    positive_ttl: Duration,
    negative_ttl: Duration,
}

impl MetadataCache {
    pub fn new(
        store: FastStore,
        repo: Arc<dyn ApiKeyRepository>,
        positive_ttl: Duration,
        negative_ttl: Duration,
    ) -> Self {
        Self {
            store,
            repo,
            positive_ttl,
            negative_ttl,
        }
    }

    fn cache_key(key_hash: &str) -> String {
        format!("cache:key:{}", key_hash)
    }

    fn lock_key(key_hash: &str) -> String {
        format!("lock:key:{}", key_hash)
    }

    /// Resolve a key record by hash. `Ok(None)` means the key does not
    /// exist (possibly served from a negative entry).
    pub async fn get(&self, key_hash: &str) -> Result<Option<ApiKey>> {
        let cache_key = Self::cache_key(key_hash);

        // A fast-store outage must not block key resolution; reads fall
        // back to the durable store and the counter call decides
        // fail-open vs fail-closed on its own.
        let cached = match self.store.get(&cache_key).await {
            Ok(value) => value,
            Err(e) => {
                debug!(error = %e, "Cache unreadable, falling back to durable store");
                return self.repo.find_by_key_hash(key_hash).await;
            }
        };
        if let Some(cached) = cached {
            return decode_entry(&cached);
        }

        // Single-flight refresh: one caller queries the durable store,
        // the rest wait on the populated entry.
        let lock_key = Self::lock_key(key_hash);
        let acquired = self.store.set_nx_ex(&lock_key, "1", LOCK_TTL).await.unwrap_or(false);

        if acquired {
            let result = self.refresh(key_hash, &cache_key).await;
            // Release even when the refresh failed so the next miss retries
            let _ = self.store.del(std::slice::from_ref(&lock_key)).await;
            return result;
        }

        // Lost the race: bounded wait for the winner to populate
        let mut waited = Duration::ZERO;
        while waited < LOCK_WAIT {
            tokio::time::sleep(LOCK_POLL).await;
            waited += LOCK_POLL;
            if let Some(cached) = self.store.get(&cache_key).await.ok().flatten() {
                return decode_entry(&cached);
            }
        }

        debug!(key_hash, "single-flight wait expired, reading durable store directly");
        self.repo.find_by_key_hash(key_hash).await
    }

    async fn refresh(&self, key_hash: &str, cache_key: &str) -> Result<Option<ApiKey>> {
        match self.repo.find_by_key_hash(key_hash).await? {
            Some(key) => {
                let serialized = serde_json::to_string(&key)?;
                // Population is best-effort; a failed write just means the
                // next request misses again.
                let _ = self.store.set_ex(cache_key, &serialized, self.positive_ttl).await;
                Ok(Some(key))
            }
            None => {
                let _ = self
                    .store
                    .set_ex(cache_key, NEGATIVE_SENTINEL, self.negative_ttl)
                    .await;
                Ok(None)
            }
        }
    }

    /// Drop cache entries after a mutation. Rotation passes both the old
    /// and the new hash.
    pub async fn invalidate(&self, key_hashes: &[&str]) -> Result<()> {
        let keys: Vec<String> = key_hashes.iter().map(|h| Self::cache_key(h)).collect();
        self.store.del(&keys).await
    }
}

fn decode_entry(raw: &str) -> Result<Option<ApiKey>> {
    if raw == NEGATIVE_SENTINEL {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(raw)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        assert_eq!(MetadataCache::cache_key("abc"), "cache:key:abc");
        assert_eq!(MetadataCache::lock_key("abc"), "lock:key:abc");
    }

    #[test]
    fn test_decode_negative_sentinel() {
        assert!(decode_entry(NEGATIVE_SENTINEL).unwrap().is_none());
    }

    #[test]
    fn test_decode_garbage_is_error() {
        assert!(decode_entry("not json").is_err());
    }
}
