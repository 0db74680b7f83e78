pub mod database;
pub mod fast_store;
pub mod limiter;
pub mod pipeline;
pub mod server;

use anyhow::Result;
use dotenvy::dotenv;
use std::env;

pub use database::DatabaseConfig;
pub use fast_store::FastStoreConfig;
pub use limiter::LimiterConfig;
pub use pipeline::PipelineConfig;
pub use server::ServerConfig;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub app: AppConfig,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub fast_store: FastStoreConfig,
    pub limiter: LimiterConfig,
    pub pipeline: PipelineConfig,
    pub alerts: AlertConfig,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub env: String,
    pub log_level: String,
    pub admin_api_key: String,
}

/// Alert webhook delivery settings. Delivery is disabled when no URL is set.
#[derive(Debug, Clone)]
pub struct AlertConfig {
    pub webhook_url: Option<String>,
    pub webhook_secret: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    /// Validates all required variables are present.
    pub fn from_env() -> Result<Self> {
        // Load .env file if present
        dotenv().ok();

        // Validate admin API key
        let admin_api_key = env::var("ADMIN_API_KEY")
            .map_err(|_| anyhow::anyhow!("ADMIN_API_KEY environment variable is required"))?;

        if admin_api_key.len() < 32 {
            anyhow::bail!("ADMIN_API_KEY must be at least 32 characters long");
        }

        Ok(Self {
            app: AppConfig {
                env: env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
                log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
                admin_api_key,
            },
            server: ServerConfig::from_env()?,
            database: DatabaseConfig::from_env()?,
            fast_store: FastStoreConfig::from_env()?,
            limiter: LimiterConfig::from_env()?,
            pipeline: PipelineConfig::from_env()?,
            alerts: AlertConfig {
                webhook_url: env::var("ALERT_WEBHOOK_URL").ok(),
                webhook_secret: env::var("ALERT_WEBHOOK_SECRET").ok(),
            },
        })
    }

    /// Cross-field validation. A misconfigured algorithm aborts startup;
    /// there is no safe fallback for a limiter that cannot decide.
    pub fn validate(&self) -> Result<()> {
        self.limiter.validate()?;
        if self.pipeline.queue_capacity == 0 {
            anyhow::bail!("QUEUE_CAPACITY must be greater than zero");
        }
        if self.alerts.webhook_url.is_some() && self.alerts.webhook_secret.is_none() {
            anyhow::bail!("ALERT_WEBHOOK_SECRET is required when ALERT_WEBHOOK_URL is set");
        }
        Ok(())
    }
}
