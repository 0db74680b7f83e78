use std::sync::Arc;

use actix_web::{web, HttpResponse, Responder};
use serde::Serialize;
use sqlx::MySqlPool;

use crate::middleware::metrics::HttpMetricsCollector;
use crate::modules::jobs::runner::RunnerMetricsSnapshot;
use crate::modules::ratelimit::engine::{DecisionEngine, EngineMetricsSnapshot};
use crate::modules::ratelimit::store::FastStore;
use crate::modules::usage::pipeline::{PipelineHandle, PipelineMetricsSnapshot};

/// Health check response structure
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}

/// Readiness probe response structure
#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub checks: ReadinessChecks,
}

#[derive(Debug, Serialize)]
pub struct ReadinessChecks {
    pub database: bool,
    pub fast_store: bool,
}

#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    pub decisions: EngineMetricsSnapshot,
    pub pipeline: PipelineMetricsSnapshot,
    pub queue_depth: usize,
    pub jobs: RunnerMetricsSnapshot,
}

/// GET /health - Liveness probe
/// Returns 200 if the application is alive; does not check dependencies
pub async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// GET /ready - Readiness probe
/// Checks both backing stores
pub async fn readiness_check(
    pool: web::Data<MySqlPool>,
    store: web::Data<FastStore>,
) -> impl Responder {
    let database = sqlx::query("SELECT 1").fetch_one(pool.get_ref()).await.is_ok();
    let fast_store = store.ping().await.is_ok();
    let ready = database && fast_store;

    let response = ReadinessResponse {
        ready,
        checks: ReadinessChecks {
            database,
            fast_store,
        },
    };

    if ready {
        HttpResponse::Ok().json(response)
    } else {
        HttpResponse::ServiceUnavailable().json(response)
    }
}

/// GET /metrics - Business metrics snapshot (decisions, pipeline, jobs)
pub async fn metrics(
    engine: web::Data<Arc<DecisionEngine>>,
    pipeline: web::Data<PipelineHandle>,
    runner_metrics: web::Data<Arc<crate::modules::jobs::runner::RunnerMetrics>>,
) -> impl Responder {
    HttpResponse::Ok().json(MetricsResponse {
        decisions: engine.metrics().snapshot(),
        pipeline: pipeline.metrics().snapshot(),
        queue_depth: pipeline.queue_depth(),
        jobs: runner_metrics.snapshot(),
    })
}

/// GET /metrics/http - Per-endpoint status/latency aggregation from the
/// HTTP metrics middleware
pub async fn http_metrics(collector: web::Data<HttpMetricsCollector>) -> impl Responder {
    HttpResponse::Ok().json(collector.snapshot())
}

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health_check))
        .route("/ready", web::get().to(readiness_check))
        .route("/metrics", web::get().to(metrics))
        .route("/metrics/http", web::get().to(http_metrics));
}
