mod config;
mod core;
mod middleware;
mod modules;

use std::sync::Arc;

use actix_web::{web, App, HttpServer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::Config;
use middleware::{AdminAuth, HttpMetricsCollector, HttpMetricsMiddleware, RequestId};
use modules::alerts::repositories::alert_repository::{AlertRepository, MySqlAlertRepository};
use modules::alerts::services::{AlertEvaluator, AlertNotifier};
use modules::api_keys::controllers::api_key_controller;
use modules::api_keys::repositories::api_key_repository::{
    ApiKeyRepository, MySqlApiKeyRepository,
};
use modules::api_keys::services::ApiKeyService;
use modules::billing::repositories::billing_repository::{
    BillingRepository, MySqlBillingRepository,
};
use modules::billing::services::BillingService;
use modules::health::controllers::health_controller;
use modules::jobs::repositories::job_repository::{JobRepository, MySqlJobRepository};
use modules::jobs::JobRunner;
use modules::ratelimit::controllers::validate_controller;
use modules::ratelimit::{DecisionEngine, FastStore, MetadataCache, RateLimiter};
use modules::usage::pipeline::{DeadLetterSink, FastStoreDeadLetter, WritePipeline};
use modules::usage::repositories::{
    MySqlUsageLogRepository, MySqlViolationRepository, UsageLogRepository, ViolationRepository,
};
use modules::usage::services::UsageDeltaFlusher;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "viva_limiter=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration; an unknown algorithm aborts here
    let config = Config::from_env().expect("Failed to load configuration");
    config.validate().expect("Configuration validation failed");

    tracing::info!("Starting viva-limiter rate limiting service");
    tracing::info!("Environment: {}", config.app.env);
    tracing::info!("Algorithm: {}", config.limiter.parsed_algorithm());

    // Backing stores
    let db_pool = config
        .database
        .create_pool()
        .await
        .expect("Failed to create database pool");
    tracing::info!(
        "Database pool initialized ({} connections)",
        config.database.pool_size
    );

    let fast_store = FastStore::connect(&config.fast_store)
        .await
        .expect("Failed to connect to fast store");
    tracing::info!("Fast store connected");

    // Repositories
    let api_key_repo: Arc<dyn ApiKeyRepository> =
        Arc::new(MySqlApiKeyRepository::new(db_pool.clone()));
    let usage_repo: Arc<dyn UsageLogRepository> =
        Arc::new(MySqlUsageLogRepository::new(db_pool.clone()));
    let violation_repo: Arc<dyn ViolationRepository> =
        Arc::new(MySqlViolationRepository::new(db_pool.clone()));
    let alert_repo: Arc<dyn AlertRepository> = Arc::new(MySqlAlertRepository::new(db_pool.clone()));
    let billing_repo: Arc<dyn BillingRepository> =
        Arc::new(MySqlBillingRepository::new(db_pool.clone()));
    let job_repo: Arc<dyn JobRepository> = Arc::new(MySqlJobRepository::new(db_pool.clone()));

    // Core components, wired leaves-first
    let limiter = RateLimiter::new(fast_store.clone(), config.limiter.parsed_algorithm());
    let cache = MetadataCache::new(
        fast_store.clone(),
        Arc::clone(&api_key_repo),
        config.limiter.cache_ttl,
        config.limiter.negative_cache_ttl,
    );

    let dlq: Arc<dyn DeadLetterSink> = Arc::new(FastStoreDeadLetter::new(fast_store.clone()));
    let pipeline = WritePipeline::spawn(
        &config.pipeline,
        Arc::clone(&usage_repo),
        Arc::clone(&violation_repo),
        dlq,
    );

    let engine = Arc::new(DecisionEngine::new(
        cache.clone(),
        limiter.clone(),
        pipeline.handle(),
        fast_store.clone(),
        config.limiter.fail_open,
    ));

    let api_key_service = Arc::new(ApiKeyService::new(
        Arc::clone(&api_key_repo),
        Arc::clone(&usage_repo),
        Arc::clone(&violation_repo),
        cache.clone(),
        config.app.env.clone(),
    ));

    let billing_service = Arc::new(BillingService::new(
        Arc::clone(&api_key_repo),
        Arc::clone(&usage_repo),
        Arc::clone(&violation_repo),
        Arc::clone(&billing_repo),
    ));

    let alert_evaluator = Arc::new(AlertEvaluator::new(
        Arc::clone(&api_key_repo),
        Arc::clone(&violation_repo),
        Arc::clone(&alert_repo),
        limiter.clone(),
    ));
    let alert_notifier = Arc::new(AlertNotifier::new(&config.alerts));

    // Background workers
    let runner = Arc::new(JobRunner::new(
        Arc::clone(&job_repo),
        Arc::clone(&api_key_repo),
        Arc::clone(&usage_repo),
        Arc::clone(&violation_repo),
        Arc::clone(&alert_repo),
        billing_service,
        alert_evaluator,
        alert_notifier,
        limiter.clone(),
        fast_store.clone(),
        2,
    ));
    let runner_metrics = runner.metrics();
    let runner_handles = Arc::clone(&runner).spawn();

    let delta_flusher = Arc::new(UsageDeltaFlusher::new(
        fast_store.clone(),
        Arc::clone(&api_key_repo),
    ));
    let flusher_handle = tokio::spawn(Arc::clone(&delta_flusher).start());

    // HTTP server
    let bind_address = config.server.bind_address();
    let workers = config.server.workers;
    let admin_key = config.app.admin_api_key.clone();
    let pipeline_handle = pipeline.handle();
    let http_metrics = HttpMetricsCollector::new();

    let server = HttpServer::new(move || {
        // Middleware runs outermost-last: RequestId mints the ident
        // before the metrics layer reads it for correlation.
        App::new()
            .wrap(HttpMetricsMiddleware::new(http_metrics.clone()))
            .wrap(tracing_actix_web::TracingLogger::default())
            .wrap(RequestId)
            .app_data(web::Data::new(http_metrics.clone()))
            .app_data(web::Data::new(db_pool.clone()))
            .app_data(web::Data::new(fast_store.clone()))
            .app_data(web::Data::new(Arc::clone(&engine)))
            .app_data(web::Data::new(Arc::clone(&api_key_service)))
            .app_data(web::Data::new(pipeline_handle.clone()))
            .app_data(web::Data::new(Arc::clone(&runner_metrics)))
            .configure(health_controller::routes)
            .service(
                web::scope("/api")
                    .configure(validate_controller::routes)
                    .service(
                        web::scope("")
                            .wrap(AdminAuth::new(admin_key.clone()))
                            .configure(api_key_controller::routes),
                    ),
            )
    })
    .workers(workers)
    .bind(&bind_address)?
    .run();

    tracing::info!("Server started at http://{}", bind_address);
    let outcome = server.await;

    // Reverse-order teardown: stop intake, then drain the pipeline
    tracing::info!("Shutting down background workers");
    runner_handles.stop();
    flusher_handle.abort();
    pipeline.shutdown().await;

    outcome
}
