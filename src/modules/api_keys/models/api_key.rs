// API key model and tier/status lifecycle.
//
// Keys are issued as `viva_{env}_{random32}` and stored only as a SHA-256
// lowercase hex digest. The plaintext is returned exactly once, on create
// and on rotate. Tier sets the default per-window limit and the billing
// constants used when monthly records are generated.

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::FromRow;
use uuid::Uuid;

use crate::core::{AppError, Result};

/// Pricing/limits bucket assigned at creation time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR(20)", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Pro,
    Enterprise,
}

impl Tier {
    /// Default requests allowed per window for new keys of this tier
    pub fn default_rate_limit(&self) -> i64 {
        match self {
            Tier::Free => 1_000,
            Tier::Pro => 10_000,
            Tier::Enterprise => 100_000,
        }
    }

    /// Default window length in seconds for new keys of this tier
    pub fn default_rate_window(&self) -> i64 {
        3_600
    }

    /// Monthly base charge
    pub fn monthly_base(&self) -> Decimal {
        match self {
            Tier::Free => Decimal::ZERO,
            Tier::Pro => Decimal::new(4_900, 2),
            Tier::Enterprise => Decimal::new(49_900, 2),
        }
    }

    /// Requests included in the monthly base charge
    pub fn included_requests(&self) -> i64 {
        match self {
            Tier::Free => 100_000,
            Tier::Pro => 1_000_000,
            Tier::Enterprise => 10_000_000,
        }
    }

    /// Charge per 1,000 requests beyond the included quota
    pub fn overage_rate_per_thousand(&self) -> Decimal {
        match self {
            Tier::Free => Decimal::ZERO,
            Tier::Pro => Decimal::new(10, 2),
            Tier::Enterprise => Decimal::new(5, 2),
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::Free => write!(f, "free"),
            Tier::Pro => write!(f, "pro"),
            Tier::Enterprise => write!(f, "enterprise"),
        }
    }
}

impl std::str::FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "free" => Ok(Tier::Free),
            "pro" => Ok(Tier::Pro),
            "enterprise" => Ok(Tier::Enterprise),
            _ => Err(format!("Invalid tier: {}", s)),
        }
    }
}

/// Key status lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR(20)", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum KeyStatus {
    /// Key may produce decisions
    Active,
    /// Temporarily disabled by an operator; may be re-activated
    Suspended,
    /// Permanently disabled
    Revoked,
}

impl std::fmt::Display for KeyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyStatus::Active => write!(f, "active"),
            KeyStatus::Suspended => write!(f, "suspended"),
            KeyStatus::Revoked => write!(f, "revoked"),
        }
    }
}

impl std::str::FromStr for KeyStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "active" => Ok(KeyStatus::Active),
            "suspended" => Ok(KeyStatus::Suspended),
            "revoked" => Ok(KeyStatus::Revoked),
            _ => Err(format!("Invalid key status: {}", s)),
        }
    }
}

/// A managed API key record. The durable store is authoritative; the
/// metadata cache holds a serialized copy of this struct on the hot path.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ApiKey {
    /// Unique key ID (UUID)
    pub id: String,

    /// SHA-256 lowercase hex of the plaintext key
    pub key_hash: String,

    /// Human-readable label
    pub name: String,

    /// Pricing/limits bucket
    pub tier: Tier,

    /// Current status
    pub status: KeyStatus,

    /// Requests allowed per window
    pub rate_limit: i64,

    /// Window length in seconds
    pub rate_window: i64,

    /// Optional burst capacity for the token-bucket algorithm
    pub burst: Option<i64>,

    /// Lifetime request count (reconciled from the fast store)
    pub total_usage: i64,

    /// Last time a decision was produced for this key
    pub last_used_at: Option<DateTime<Utc>>,

    /// Opaque client-supplied map
    #[sqlx(json)]
    #[serde(default)]
    pub metadata: serde_json::Value,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Soft-delete marker; deleted keys never produce decisions
    pub deleted_at: Option<DateTime<Utc>>,
}

impl ApiKey {
    /// Issue a new key: returns the record plus the one-time plaintext.
    pub fn issue(
        name: String,
        tier: Tier,
        env: &str,
        rate_limit: Option<i64>,
        rate_window: Option<i64>,
        metadata: Option<serde_json::Value>,
    ) -> Result<(Self, String)> {
        Self::validate_name(&name)?;
        if let Some(limit) = rate_limit {
            Self::validate_limit(limit)?;
        }
        if let Some(window) = rate_window {
            Self::validate_window(window)?;
        }

        let plaintext = Self::generate_plaintext(env);
        let now = Utc::now();

        let key = Self {
            id: Uuid::new_v4().to_string(),
            key_hash: Self::hash(&plaintext),
            name,
            tier,
            status: KeyStatus::Active,
            rate_limit: rate_limit.unwrap_or_else(|| tier.default_rate_limit()),
            rate_window: rate_window.unwrap_or_else(|| tier.default_rate_window()),
            burst: None,
            total_usage: 0,
            last_used_at: None,
            metadata: metadata.unwrap_or_else(|| serde_json::json!({})),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        Ok((key, plaintext))
    }

    /// `viva_{env}_{random32}`: 32 alphanumeric characters of entropy
    pub fn generate_plaintext(env: &str) -> String {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(32)
            .map(char::from)
            .collect();
        format!("viva_{}_{}", env, suffix)
    }

    /// SHA-256 lowercase hex digest of a plaintext key
    pub fn hash(plaintext: &str) -> String {
        let digest = Sha256::digest(plaintext.as_bytes());
        hex::encode(digest)
    }

    /// Whether this key may produce decisions at all
    pub fn is_active(&self) -> bool {
        self.status == KeyStatus::Active && self.deleted_at.is_none()
    }

    /// Replace the stored hash with one for a freshly generated plaintext.
    /// Returns the new plaintext; the caller must invalidate the cache for
    /// both the old and the new hash.
    pub fn rotate(&mut self, env: &str) -> String {
        let plaintext = Self::generate_plaintext(env);
        self.key_hash = Self::hash(&plaintext);
        self.updated_at = Utc::now();
        plaintext
    }

    fn validate_name(name: &str) -> Result<()> {
        if name.trim().is_empty() {
            return Err(AppError::validation("Key name cannot be empty"));
        }
        if name.len() > 100 {
            return Err(AppError::validation("Key name cannot exceed 100 characters"));
        }
        Ok(())
    }

    fn validate_limit(limit: i64) -> Result<()> {
        if limit < 1 {
            return Err(AppError::validation("rate_limit must be at least 1"));
        }
        Ok(())
    }

    fn validate_window(window: i64) -> Result<()> {
        if window < 1 {
            return Err(AppError::validation("rate_window must be at least 1 second"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plaintext_format() {
        let plaintext = ApiKey::generate_plaintext("dev");
        assert!(plaintext.starts_with("viva_dev_"));
        let suffix = plaintext.strip_prefix("viva_dev_").unwrap();
        assert_eq!(suffix.len(), 32);
        assert!(suffix.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_hash_is_lowercase_hex() {
        let hash = ApiKey::hash("viva_dev_abc");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        // deterministic
        assert_eq!(hash, ApiKey::hash("viva_dev_abc"));
    }

    #[test]
    fn test_issue_applies_tier_defaults() {
        let (key, plaintext) =
            ApiKey::issue("test".to_string(), Tier::Free, "dev", None, None, None).unwrap();
        assert_eq!(key.rate_limit, 1_000);
        assert_eq!(key.rate_window, 3_600);
        assert_eq!(key.status, KeyStatus::Active);
        assert_eq!(key.key_hash, ApiKey::hash(&plaintext));
        assert!(key.is_active());
    }

    #[test]
    fn test_issue_rejects_bad_input() {
        assert!(ApiKey::issue("".to_string(), Tier::Free, "dev", None, None, None).is_err());
        assert!(ApiKey::issue("k".to_string(), Tier::Free, "dev", Some(0), None, None).is_err());
        assert!(ApiKey::issue("k".to_string(), Tier::Free, "dev", None, Some(0), None).is_err());
    }

    #[test]
    fn test_rotate_changes_hash() {
        let (mut key, old_plaintext) =
            ApiKey::issue("test".to_string(), Tier::Pro, "dev", None, None, None).unwrap();
        let old_hash = key.key_hash.clone();
        let new_plaintext = key.rotate("dev");
        assert_ne!(new_plaintext, old_plaintext);
        assert_ne!(key.key_hash, old_hash);
        assert_eq!(key.key_hash, ApiKey::hash(&new_plaintext));
    }

    #[test]
    fn test_suspended_key_not_active() {
        let (mut key, _) =
            ApiKey::issue("test".to_string(), Tier::Free, "dev", None, None, None).unwrap();
        key.status = KeyStatus::Suspended;
        assert!(!key.is_active());

        key.status = KeyStatus::Active;
        key.deleted_at = Some(Utc::now());
        assert!(!key.is_active());
    }
}
