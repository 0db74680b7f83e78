// Reconciliation of buffered usage deltas into the durable store.
//
// Allowed decisions bump `usage:delta:{api_key_id}` in the fast store
// instead of writing api_keys on every request. This service drains those
// buffers with GETDEL and folds each delta into total_usage with a single
// additive UPDATE. Runs from a 60-second timer and again from the
// sync_cache_with_db background job; both paths share flush_usage_deltas
// and the GETDEL keeps them from double-counting.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::interval;
use tracing::{error, info, warn};

use crate::core::Result;
use crate::modules::api_keys::repositories::api_key_repository::ApiKeyRepository;
use crate::modules::ratelimit::store::FastStore;

pub const DELTA_KEY_PREFIX: &str = "usage:delta:";

/// Buffer key for a key's pending usage count
pub fn delta_key(api_key_id: &str) -> String {
    format!("{}{}", DELTA_KEY_PREFIX, api_key_id)
}

/// Drain every pending delta buffer. Returns the number of keys flushed.
pub async fn flush_usage_deltas(
    store: &FastStore,
    repo: &dyn ApiKeyRepository,
) -> Result<u64> {
    let pattern = format!("{}*", DELTA_KEY_PREFIX);
    let keys = store.scan_match(&pattern).await?;
    let now = Utc::now();
    let mut flushed = 0u64;

    for key in keys {
        let Some(api_key_id) = key.strip_prefix(DELTA_KEY_PREFIX) else {
            continue;
        };

        // GETDEL claims the delta atomically; concurrent flushers see
        // nothing and requests started afterwards open a fresh buffer.
        let Some(raw) = store.get_del(&key).await? else {
            continue;
        };
        let delta: i64 = match raw.parse() {
            Ok(v) => v,
            Err(_) => {
                warn!(key, raw, "Discarding unparsable usage delta");
                continue;
            }
        };
        if delta <= 0 {
            continue;
        }

        if let Err(e) = repo.increment_total_usage(api_key_id, delta, now).await {
            // Push the delta back so the next run retries it.
            error!(error = %e, api_key_id, "Failed to fold usage delta, re-buffering");
            let _ = store
                .incr_by_expire(&key, delta, Duration::from_secs(24 * 3600))
                .await;
            continue;
        }
        flushed += 1;
    }

    Ok(flushed)
}

/// Periodic driver for the 60-second reconciliation cadence
pub struct UsageDeltaFlusher {
    store: FastStore,
    repo: Arc<dyn ApiKeyRepository>,
    period: Duration,
}

impl UsageDeltaFlusher {
    pub fn new(store: FastStore, repo: Arc<dyn ApiKeyRepository>) -> Self {
        Self {
            store,
            repo,
            period: Duration::from_secs(60),
        }
    }

    /// Spawn as a tokio task from the composition root
    pub async fn start(self: Arc<Self>) {
        info!("Starting usage delta flusher (runs every 60 seconds)");

        let mut ticker = interval(self.period);

        loop {
            ticker.tick().await;

            match flush_usage_deltas(&self.store, &*self.repo).await {
                Ok(flushed) => {
                    if flushed > 0 {
                        info!(flushed, "Usage deltas reconciled");
                    }
                }
                Err(e) => {
                    error!(error = %e, "Error flushing usage deltas");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delta_key_layout() {
        assert_eq!(delta_key("abc-123"), "usage:delta:abc-123");
    }
}
