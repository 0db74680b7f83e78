use anyhow::Result;
use std::env;
use std::time::Duration;

/// Fast store (Redis) connection settings.
///
/// Counters, the metadata cache, usage-delta buffers and the write DLQ all
/// live behind this single connection manager. Timeouts bound every call so
/// a slow Redis degrades the decision path instead of hanging it.
#[derive(Debug, Clone)]
pub struct FastStoreConfig {
    pub url: String,
    /// Overrides any password embedded in the URL
    pub password: Option<String>,
    pub pool_size: u32,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
}

impl FastStoreConfig {
    pub fn from_env() -> Result<Self> {
        Ok(FastStoreConfig {
            url: env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            password: env::var("REDIS_PASSWORD").ok(),
            pool_size: env::var("REDIS_POOL_SIZE")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("REDIS_POOL_SIZE must be a valid number"))?,
            read_timeout: Duration::from_millis(
                env::var("REDIS_READ_TIMEOUT_MS")
                    .unwrap_or_else(|_| "250".to_string())
                    .parse()
                    .map_err(|_| anyhow::anyhow!("REDIS_READ_TIMEOUT_MS must be a valid number"))?,
            ),
            write_timeout: Duration::from_millis(
                env::var("REDIS_WRITE_TIMEOUT_MS")
                    .unwrap_or_else(|_| "250".to_string())
                    .parse()
                    .map_err(|_| anyhow::anyhow!("REDIS_WRITE_TIMEOUT_MS must be a valid number"))?,
            ),
        })
    }
}
