use anyhow::Result;
use std::env;
use std::time::Duration;

use crate::modules::ratelimit::Algorithm;

/// Decision engine settings
#[derive(Debug, Clone)]
pub struct LimiterConfig {
    /// Raw algorithm name from the environment, validated at startup
    pub algorithm: String,
    /// Allow requests when the fast store is unreachable
    pub fail_open: bool,
    /// Positive metadata cache TTL
    pub cache_ttl: Duration,
    /// Negative (key-not-found) cache TTL
    pub negative_cache_ttl: Duration,
}

impl LimiterConfig {
    pub fn from_env() -> Result<Self> {
        Ok(LimiterConfig {
            algorithm: env::var("RATE_LIMIT_ALGORITHM").unwrap_or_else(|_| "sliding".to_string()),
            fail_open: env::var("RATE_LIMIT_FAIL_OPEN")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            cache_ttl: Duration::from_secs(
                env::var("CACHE_TTL_SECONDS")
                    .unwrap_or_else(|_| "300".to_string())
                    .parse()
                    .map_err(|_| anyhow::anyhow!("CACHE_TTL_SECONDS must be a valid number"))?,
            ),
            negative_cache_ttl: Duration::from_secs(
                env::var("NEGATIVE_CACHE_TTL_SECONDS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()
                    .map_err(|_| {
                        anyhow::anyhow!("NEGATIVE_CACHE_TTL_SECONDS must be a valid number")
                    })?,
            ),
        })
    }

    /// Startup abort on an unknown algorithm name. Every decision dispatches
    /// through this value, so there is nothing sensible to fall back to.
    pub fn validate(&self) -> Result<()> {
        self.algorithm
            .parse::<Algorithm>()
            .map_err(|e| anyhow::anyhow!(e))?;
        Ok(())
    }

    pub fn parsed_algorithm(&self) -> Algorithm {
        // validate() runs before the engine is constructed
        self.algorithm.parse().unwrap_or(Algorithm::SlidingWindow)
    }
}
