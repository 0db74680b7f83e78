use anyhow::Result;
use std::env;
use std::time::Duration;

/// Async write pipeline settings
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Bounded queue capacity shared by usage logs and violations
    pub queue_capacity: usize,
    /// Number of draining workers
    pub workers: usize,
    /// Flush when this many events are buffered
    pub batch_size: usize,
    /// Flush at least this often regardless of batch fill
    pub flush_interval: Duration,
    /// How long a violation producer may block on a full queue
    pub violation_enqueue_timeout: Duration,
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self> {
        Ok(PipelineConfig {
            queue_capacity: env::var("QUEUE_CAPACITY")
                .unwrap_or_else(|_| "10000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("QUEUE_CAPACITY must be a valid number"))?,
            workers: env::var("PIPELINE_WORKERS")
                .unwrap_or_else(|_| "2".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PIPELINE_WORKERS must be a valid number"))?,
            batch_size: 500,
            flush_interval: Duration::from_secs(1),
            violation_enqueue_timeout: Duration::from_millis(50),
        })
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10_000,
            workers: 2,
            batch_size: 500,
            flush_interval: Duration::from_secs(1),
            violation_enqueue_timeout: Duration::from_millis(50),
        }
    }
}
