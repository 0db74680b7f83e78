// Rate-limit primitives over the fast store.
//
// The three algorithms share one capability: consume(cost) yielding
// (allowed, remaining, reset_at). Dispatch is a tagged enum chosen by
// configuration; counter mutation happens only inside the server-side
// scripts.

use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::core::{AppError, Result};
use crate::modules::ratelimit::scripts;
use crate::modules::ratelimit::store::FastStore;

/// Counter algorithm selected by configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    SlidingWindow,
    FixedWindow,
    TokenBucket,
}

impl std::str::FromStr for Algorithm {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "sliding" | "sliding_window" => Ok(Algorithm::SlidingWindow),
            "fixed" | "fixed_window" => Ok(Algorithm::FixedWindow),
            "token" | "token_bucket" => Ok(Algorithm::TokenBucket),
            _ => Err(format!(
                "Unknown rate limit algorithm '{}' (expected sliding, fixed or token)",
                s
            )),
        }
    }
}

impl std::fmt::Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Algorithm::SlidingWindow => write!(f, "sliding"),
            Algorithm::FixedWindow => write!(f, "fixed"),
            Algorithm::TokenBucket => write!(f, "token"),
        }
    }
}

/// Result of a single counter consumption
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitOutcome {
    pub allowed: bool,
    pub remaining: i64,
    /// Epoch second at which a retry is guaranteed to succeed
    pub reset_at: i64,
}

/// Epoch second of the UTC-aligned window containing `now`
pub fn fixed_window_start(now: i64, window: i64) -> i64 {
    (now / window) * window
}

/// Token-bucket parameters derived from a key's (limit, window, burst).
/// Refill is per second where the window allows it, so short bursts
/// recover without waiting out the whole window; capacity comes from the
/// burst override when present.
pub fn token_bucket_params(limit: i64, window: i64, burst: Option<i64>) -> (i64, i64, i64) {
    let capacity = burst.unwrap_or(limit).max(1);
    let (refill_rate, refill_period) = if limit >= window {
        // at least one token per second
        (((limit + window - 1) / window).max(1), 1)
    } else {
        // fewer tokens than seconds: one token every window/limit seconds
        (1, (window / limit).max(1))
    };
    (capacity, refill_rate, refill_period)
}

/// Pure refill computation, mirrored by the token-bucket script. Exposed
/// for the read-only peek path and for tests.
pub fn token_refill(
    tokens: i64,
    last_refill: i64,
    now: i64,
    capacity: i64,
    refill_rate: i64,
    refill_period: i64,
) -> (i64, i64) {
    let intervals = (now - last_refill) / refill_period;
    if intervals <= 0 {
        return (tokens, last_refill);
    }
    let refilled = (tokens + intervals * refill_rate).min(capacity);
    (refilled, last_refill + intervals * refill_period)
}

/// Atomic rate-limit counter over the fast store
#[derive(Clone)]
pub struct RateLimiter {
    store: FastStore,
    algorithm: Algorithm,
}

impl RateLimiter {
    pub fn new(store: FastStore, algorithm: Algorithm) -> Self {
        Self { store, algorithm }
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Consume `cost` slots for `counter_key`. Serialization of concurrent
    /// calls on the same key is provided by script atomicity.
    pub async fn check(
        &self,
        counter_key: &str,
        limit: i64,
        window: i64,
        burst: Option<i64>,
        cost: i64,
    ) -> Result<RateLimitOutcome> {
        let now = Utc::now().timestamp();

        let reply = match self.algorithm {
            Algorithm::SlidingWindow => {
                let key = format!("rl:sw:{}", counter_key);
                let seed = entry_seed();
                self.store
                    .invoke_script(
                        &scripts::sliding_window(),
                        &key,
                        &[
                            now.to_string(),
                            window.to_string(),
                            limit.to_string(),
                            cost.to_string(),
                            seed,
                        ],
                    )
                    .await?
            }
            Algorithm::FixedWindow => {
                let window_start = fixed_window_start(now, window);
                let key = format!("rl:fw:{}:{}", counter_key, window_start);
                self.store
                    .invoke_script(
                        &scripts::fixed_window(),
                        &key,
                        &[
                            window.to_string(),
                            limit.to_string(),
                            cost.to_string(),
                            window_start.to_string(),
                        ],
                    )
                    .await?
            }
            Algorithm::TokenBucket => {
                let key = format!("rl:tb:{}", counter_key);
                let (capacity, refill_rate, refill_period) =
                    token_bucket_params(limit, window, burst);
                self.store
                    .invoke_script(
                        &scripts::token_bucket(),
                        &key,
                        &[
                            now.to_string(),
                            capacity.to_string(),
                            refill_rate.to_string(),
                            refill_period.to_string(),
                            cost.to_string(),
                        ],
                    )
                    .await?
            }
        };

        parse_script_reply(&reply)
    }

    /// Recompute the current state without consuming. Sliding-window peek
    /// trims expired entries (they are semantically gone) but inserts
    /// nothing.
    pub async fn peek(
        &self,
        counter_key: &str,
        limit: i64,
        window: i64,
        burst: Option<i64>,
    ) -> Result<RateLimitOutcome> {
        let now = Utc::now().timestamp();

        match self.algorithm {
            Algorithm::SlidingWindow => {
                let key = format!("rl:sw:{}", counter_key);
                self.store.zremrangebyscore(&key, now - window).await?;
                let current = self.store.zcard(&key).await?;
                let reset_at = match self.store.zmin_score(&key).await? {
                    Some(oldest) => oldest + window,
                    None => now,
                };
                Ok(RateLimitOutcome {
                    allowed: current < limit,
                    remaining: (limit - current).max(0),
                    reset_at,
                })
            }
            Algorithm::FixedWindow => {
                let window_start = fixed_window_start(now, window);
                let key = format!("rl:fw:{}:{}", counter_key, window_start);
                let current = self.store.get_i64(&key).await?.unwrap_or(0);
                Ok(RateLimitOutcome {
                    allowed: current < limit,
                    remaining: (limit - current).max(0),
                    reset_at: window_start + window,
                })
            }
            Algorithm::TokenBucket => {
                let key = format!("rl:tb:{}", counter_key);
                let (capacity, refill_rate, refill_period) =
                    token_bucket_params(limit, window, burst);
                let fields = self.store.hgetall(&key).await?;
                let tokens = fields
                    .get("tokens")
                    .and_then(|v| v.parse::<f64>().ok())
                    .map(|v| v as i64)
                    .unwrap_or(capacity);
                let last_refill = fields
                    .get("last_refill")
                    .and_then(|v| v.parse::<i64>().ok())
                    .unwrap_or(now);

                let (available, advanced_refill) =
                    token_refill(tokens, last_refill, now, capacity, refill_rate, refill_period);
                let reset_at = if available >= 1 {
                    now
                } else {
                    advanced_refill + refill_period
                };
                Ok(RateLimitOutcome {
                    allowed: available >= 1,
                    remaining: available,
                    reset_at,
                })
            }
        }
    }
}

/// Unique sorted-set member seed: nanosecond timestamp plus random suffix
/// so entries landing in the same second never collide.
fn entry_seed() -> String {
    let now_ns = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let suffix: u32 = rand::thread_rng().gen();
    format!("{}:{:08x}", now_ns, suffix)
}

fn parse_script_reply(reply: &[i64]) -> Result<RateLimitOutcome> {
    if reply.len() < 3 {
        return Err(AppError::fast_store(format!(
            "unexpected script reply of length {}",
            reply.len()
        )));
    }
    Ok(RateLimitOutcome {
        allowed: reply[0] == 1,
        remaining: reply[1],
        reset_at: reply[2],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_algorithm_parsing() {
        assert_eq!("sliding".parse::<Algorithm>().unwrap(), Algorithm::SlidingWindow);
        assert_eq!("fixed".parse::<Algorithm>().unwrap(), Algorithm::FixedWindow);
        assert_eq!("token".parse::<Algorithm>().unwrap(), Algorithm::TokenBucket);
        assert!("leaky".parse::<Algorithm>().is_err());
    }

    #[test]
    fn test_fixed_window_alignment() {
        assert_eq!(fixed_window_start(1_700_000_123, 60), 1_700_000_100);
        assert_eq!(fixed_window_start(1_700_000_100, 60), 1_700_000_100);
        // boundaries align to wall-clock multiples of the window
        assert_eq!(fixed_window_start(1_700_000_123, 60) % 60, 0);
    }

    #[test]
    fn test_token_bucket_params_mapping() {
        // 5 requests per 5 seconds: one token per second
        assert_eq!(token_bucket_params(5, 5, None), (5, 1, 1));
        // burst overrides capacity
        assert_eq!(token_bucket_params(5, 5, Some(10)), (10, 1, 1));
        // sparse limit: one token every 12 seconds
        assert_eq!(token_bucket_params(5, 60, None), (5, 1, 12));
        // dense limit: ceil(1000/60) = 17 tokens per second
        assert_eq!(token_bucket_params(1_000, 60, None), (1_000, 17, 1));
    }

    #[test]
    fn test_token_refill_caps_at_capacity() {
        // 0 tokens, 10 elapsed seconds at 1/s, capacity 5
        let (tokens, last) = token_refill(0, 100, 110, 5, 1, 1);
        assert_eq!(tokens, 5);
        assert_eq!(last, 110);
    }

    #[test]
    fn test_token_refill_advances_by_whole_periods() {
        // period 3s: 7 elapsed seconds is two whole periods
        let (tokens, last) = token_refill(0, 100, 107, 5, 1, 3);
        assert_eq!(tokens, 2);
        assert_eq!(last, 106);
    }

    #[test]
    fn test_parse_script_reply() {
        let outcome = parse_script_reply(&[1, 4, 1_700_000_160]).unwrap();
        assert!(outcome.allowed);
        assert_eq!(outcome.remaining, 4);
        assert_eq!(outcome.reset_at, 1_700_000_160);

        assert!(parse_script_reply(&[1]).is_err());
    }

    #[test]
    fn test_entry_seed_uniqueness() {
        let a = entry_seed();
        let b = entry_seed();
        assert_ne!(a, b);
    }
}
