// Asynchronous write pipeline for usage logs and violations.
//
// Producers (the decision engine) never wait on the durable store: events
// land in a bounded queue and a small worker pool drains them in batches,
// flushing on size or on a timer, whichever fires first. Usage logs are
// lossy under pressure; violations block briefly and overflow to the
// dead-letter list instead of being dropped. Batches that exhaust their
// retries are serialized to the DLQ for operator replay.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::PipelineConfig;
use crate::core::Result;
use crate::modules::ratelimit::store::FastStore;
use crate::modules::usage::models::{RateLimitViolation, UsageLog};
use crate::modules::usage::repositories::{UsageLogRepository, ViolationRepository};

pub const DLQ_KEY: &str = "dlq:writes";

const FLUSH_ATTEMPTS: u32 = 3;
const RETRY_BASE: Duration = Duration::from_millis(100);

/// One event accepted by the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WriteEvent {
    Usage(UsageLog),
    Violation(RateLimitViolation),
}

/// Destination for batches that exhausted their retries
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn push(&self, payload: &str) -> Result<()>;
}

/// Fast-store DLQ: serialized batches on the `dlq:writes` list
pub struct FastStoreDeadLetter {
    store: FastStore,
}

impl FastStoreDeadLetter {
    pub fn new(store: FastStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl DeadLetterSink for FastStoreDeadLetter {
    async fn push(&self, payload: &str) -> Result<()> {
        self.store.lpush(DLQ_KEY, payload).await
    }
}

/// Lock-free counters surfaced through the metrics endpoint
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    pub enqueued: AtomicU64,
    pub dropped_usage: AtomicU64,
    pub flushed_events: AtomicU64,
    pub flush_retries: AtomicU64,
    pub dead_lettered: AtomicU64,
}

#[derive(Debug, Serialize)]
pub struct PipelineMetricsSnapshot {
    pub enqueued: u64,
    pub dropped_usage: u64,
    pub flushed_events: u64,
    pub flush_retries: u64,
    pub dead_lettered: u64,
}

impl PipelineMetrics {
    pub fn snapshot(&self) -> PipelineMetricsSnapshot {
        PipelineMetricsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dropped_usage: self.dropped_usage.load(Ordering::Relaxed),
            flushed_events: self.flushed_events.load(Ordering::Relaxed),
            flush_retries: self.flush_retries.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
        }
    }
}

/// Cloneable producer side handed to the decision engine
#[derive(Clone)]
pub struct PipelineHandle {
    tx: mpsc::Sender<WriteEvent>,
    dlq: Arc<dyn DeadLetterSink>,
    metrics: Arc<PipelineMetrics>,
    violation_timeout: Duration,
}

impl PipelineHandle {
    /// Lossy enqueue. A full queue drops the event and counts it; the
    /// decision has already been returned and must not be delayed.
    pub fn enqueue_usage(&self, log: UsageLog) {
        match self.tx.try_send(WriteEvent::Usage(log)) {
            Ok(()) => {
                self.metrics.enqueued.fetch_add(1, Ordering::Relaxed);
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.metrics.dropped_usage.fetch_add(1, Ordering::Relaxed);
                debug!("Usage log dropped, write queue full");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("Usage log dropped, write pipeline shut down");
            }
        }
    }

    /// Violations prefer durability: block up to the configured timeout,
    /// then fall through to the dead-letter list rather than dropping.
    pub async fn enqueue_violation(&self, violation: RateLimitViolation) {
        match self
            .tx
            .send_timeout(WriteEvent::Violation(violation), self.violation_timeout)
            .await
        {
            Ok(()) => {
                self.metrics.enqueued.fetch_add(1, Ordering::Relaxed);
            }
            Err(mpsc::error::SendTimeoutError::Timeout(event))
            | Err(mpsc::error::SendTimeoutError::Closed(event)) => {
                warn!("Write queue saturated, sending violation to dead-letter list");
                dead_letter(&*self.dlq, &self.metrics, std::slice::from_ref(&event)).await;
            }
        }
    }

    /// Events currently buffered
    pub fn queue_depth(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        Arc::clone(&self.metrics)
    }
}

/// Owner of the worker tasks; constructed once at composition time
pub struct WritePipeline {
    handle: PipelineHandle,
    workers: Vec<JoinHandle<()>>,
}

impl WritePipeline {
    pub fn spawn(
        config: &PipelineConfig,
        usage_repo: Arc<dyn UsageLogRepository>,
        violation_repo: Arc<dyn ViolationRepository>,
        dlq: Arc<dyn DeadLetterSink>,
    ) -> Self {
        let (tx, rx) = mpsc::channel::<WriteEvent>(config.queue_capacity);
        let metrics = Arc::new(PipelineMetrics::default());
        let rx = Arc::new(Mutex::new(rx));

        let workers = (0..config.workers.max(1))
            .map(|worker_id| {
                let rx = Arc::clone(&rx);
                let usage_repo = Arc::clone(&usage_repo);
                let violation_repo = Arc::clone(&violation_repo);
                let dlq = Arc::clone(&dlq);
                let metrics = Arc::clone(&metrics);
                let batch_size = config.batch_size;
                let flush_interval = config.flush_interval;

                tokio::spawn(async move {
                    worker_loop(
                        worker_id,
                        rx,
                        usage_repo,
                        violation_repo,
                        dlq,
                        metrics,
                        batch_size,
                        flush_interval,
                    )
                    .await;
                })
            })
            .collect();

        let handle = PipelineHandle {
            tx,
            dlq,
            metrics,
            violation_timeout: config.violation_enqueue_timeout,
        };

        Self { handle, workers }
    }

    pub fn handle(&self) -> PipelineHandle {
        self.handle.clone()
    }

    /// Drain and stop. All other producer handles must already be
    /// dropped; the workers exit once the channel closes and the last
    /// buffered event has been flushed.
    pub async fn shutdown(self) {
        let WritePipeline { handle, workers } = self;
        drop(handle);
        for worker in workers {
            if let Err(e) = worker.await {
                error!(error = %e, "Pipeline worker panicked during shutdown");
            }
        }
        info!("Write pipeline drained and stopped");
    }
}

#[allow(clippy::too_many_arguments)]
async fn worker_loop(
    worker_id: usize,
    rx: Arc<Mutex<mpsc::Receiver<WriteEvent>>>,
    usage_repo: Arc<dyn UsageLogRepository>,
    violation_repo: Arc<dyn ViolationRepository>,
    dlq: Arc<dyn DeadLetterSink>,
    metrics: Arc<PipelineMetrics>,
    batch_size: usize,
    flush_interval: Duration,
) {
    debug!(worker_id, "Pipeline worker started");

    loop {
        let mut batch = Vec::new();
        let mut closed = false;

        {
            let mut guard = rx.lock().await;

            // Block for the first event, then fill until the batch is full
            // or the flush deadline passes.
            match guard.recv().await {
                Some(event) => batch.push(event),
                None => break,
            }

            let deadline = Instant::now() + flush_interval;
            while batch.len() < batch_size {
                match tokio::time::timeout_at(deadline, guard.recv()).await {
                    Ok(Some(event)) => batch.push(event),
                    Ok(None) => {
                        closed = true;
                        break;
                    }
                    Err(_) => break,
                }
            }
        }

        flush_batch(&batch, &*usage_repo, &*violation_repo, &*dlq, &metrics).await;

        if closed {
            break;
        }
    }

    debug!(worker_id, "Pipeline worker stopped");
}

/// Write one batch, retrying each kind independently so a failing
/// violations table does not dead-letter the usage logs beside it.
async fn flush_batch(
    batch: &[WriteEvent],
    usage_repo: &dyn UsageLogRepository,
    violation_repo: &dyn ViolationRepository,
    dlq: &dyn DeadLetterSink,
    metrics: &PipelineMetrics,
) {
    if batch.is_empty() {
        return;
    }

    let mut usage = Vec::new();
    let mut violations = Vec::new();
    for event in batch {
        match event {
            WriteEvent::Usage(log) => usage.push(log.clone()),
            WriteEvent::Violation(v) => violations.push(v.clone()),
        }
    }

    if !usage.is_empty() {
        let events: Vec<WriteEvent> = usage.iter().cloned().map(WriteEvent::Usage).collect();
        let outcome = with_retries(metrics, || usage_repo.insert_batch(&usage)).await;
        match outcome {
            Ok(()) => {
                metrics
                    .flushed_events
                    .fetch_add(usage.len() as u64, Ordering::Relaxed);
            }
            Err(e) => {
                error!(error = %e, count = usage.len(), "Usage batch failed permanently");
                dead_letter(dlq, metrics, &events).await;
            }
        }
    }

    if !violations.is_empty() {
        let events: Vec<WriteEvent> = violations
            .iter()
            .cloned()
            .map(WriteEvent::Violation)
            .collect();
        let outcome = with_retries(metrics, || violation_repo.insert_batch(&violations)).await;
        match outcome {
            Ok(()) => {
                metrics
                    .flushed_events
                    .fetch_add(violations.len() as u64, Ordering::Relaxed);
            }
            Err(e) => {
                error!(error = %e, count = violations.len(), "Violation batch failed permanently");
                dead_letter(dlq, metrics, &events).await;
            }
        }
    }
}

/// Three attempts with exponential backoff (100 ms, 300 ms, 900 ms)
async fn with_retries<F, Fut>(metrics: &PipelineMetrics, mut op: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<()>>,
{
    let mut delay = RETRY_BASE;
    let mut last_err = None;

    for attempt in 0..FLUSH_ATTEMPTS {
        match op().await {
            Ok(()) => return Ok(()),
            Err(e) => {
                last_err = Some(e);
                if attempt + 1 < FLUSH_ATTEMPTS {
                    metrics.flush_retries.fetch_add(1, Ordering::Relaxed);
                    tokio::time::sleep(delay).await;
                    delay *= 3;
                }
            }
        }
    }

    Err(last_err.expect("at least one attempt"))
}

async fn dead_letter(dlq: &dyn DeadLetterSink, metrics: &PipelineMetrics, events: &[WriteEvent]) {
    match serde_json::to_string(events) {
        Ok(payload) => {
            if let Err(e) = dlq.push(&payload).await {
                // Both stores are down; the events are gone. Count them so
                // the loss is at least visible.
                error!(error = %e, count = events.len(), "Dead-letter push failed, events lost");
            }
            metrics
                .dead_lettered
                .fetch_add(events.len() as u64, Ordering::Relaxed);
        }
        Err(e) => {
            error!(error = %e, "Failed to serialize dead-letter batch");
        }
    }
}
