// HTTP plumbing: admin guard, health probe, request-id propagation and
// the HTTP metrics layer, exercised through an in-process actix app.

use actix_web::{test, web, App, HttpResponse};

use viva_limiter::middleware::{AdminAuth, HttpMetricsCollector, HttpMetricsMiddleware, RequestId};
use viva_limiter::modules::health::controllers::health_controller;

const ADMIN_KEY: &str = "test-admin-key-0123456789abcdefghij";

async fn guarded_handler() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({"ok": true}))
}

#[actix_web::test]
async fn test_admin_guard_rejects_missing_key() {
    let app = test::init_service(
        App::new().service(
            web::scope("/admin")
                .wrap(AdminAuth::new(ADMIN_KEY.to_string()))
                .route("/keys", web::get().to(guarded_handler)),
        ),
    )
    .await;

    let req = test::TestRequest::get().uri("/admin/keys").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 401);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");
}

#[actix_web::test]
async fn test_admin_guard_rejects_wrong_key() {
    let app = test::init_service(
        App::new().service(
            web::scope("/admin")
                .wrap(AdminAuth::new(ADMIN_KEY.to_string()))
                .route("/keys", web::get().to(guarded_handler)),
        ),
    )
    .await;

    let req = test::TestRequest::get()
        .uri("/admin/keys")
        .insert_header(("X-Admin-Key", "wrong-key"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 401);
}

#[actix_web::test]
async fn test_admin_guard_accepts_configured_key() {
    let app = test::init_service(
        App::new().service(
            web::scope("/admin")
                .wrap(AdminAuth::new(ADMIN_KEY.to_string()))
                .route("/keys", web::get().to(guarded_handler)),
        ),
    )
    .await;

    let req = test::TestRequest::get()
        .uri("/admin/keys")
        .insert_header(("X-Admin-Key", ADMIN_KEY))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 200);
}

#[actix_web::test]
async fn test_health_is_unguarded() {
    let app = test::init_service(
        App::new()
            .wrap(RequestId)
            .route("/health", web::get().to(health_controller::health_check)),
    )
    .await;

    let req = test::TestRequest::get().uri("/health").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 200);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "healthy");
}

#[actix_web::test]
async fn test_request_id_is_echoed_on_the_response() {
    let app = test::init_service(
        App::new()
            .wrap(RequestId)
            .route("/health", web::get().to(health_controller::health_check)),
    )
    .await;

    // upstream ident comes back verbatim
    let req = test::TestRequest::get()
        .uri("/health")
        .insert_header(("X-Request-ID", "req-42"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 200);
    assert_eq!(resp.headers().get("x-request-id").unwrap(), "req-42");

    // a missing ident is minted and still echoed
    let req = test::TestRequest::get().uri("/health").to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.headers().get("x-request-id").is_some());
}

#[actix_web::test]
async fn test_http_metrics_aggregate_per_endpoint() {
    let collector = HttpMetricsCollector::new();
    let app = test::init_service(
        App::new()
            .wrap(HttpMetricsMiddleware::new(collector.clone()))
            .wrap(RequestId)
            .app_data(web::Data::new(collector.clone()))
            .route("/health", web::get().to(health_controller::health_check))
            .route("/metrics/http", web::get().to(health_controller::http_metrics)),
    )
    .await;

    for _ in 0..3 {
        let req = test::TestRequest::get().uri("/health").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status().as_u16(), 200);
    }

    let snapshot = collector.snapshot();
    assert_eq!(snapshot.endpoints["GET /health"].requests, 3);
    assert_eq!(snapshot.successful_requests, 3);

    // the snapshot endpoint serves the same numbers, plus its own hit
    let req = test::TestRequest::get().uri("/metrics/http").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 200);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["endpoints"]["GET /health"]["requests"], 3);
}

#[actix_web::test]
async fn test_http_metrics_count_unguarded_admin_requests() {
    let collector = HttpMetricsCollector::new();
    let app = test::init_service(
        App::new()
            .wrap(HttpMetricsMiddleware::new(collector.clone()))
            .wrap(RequestId)
            .service(
                web::scope("/admin")
                    .wrap(AdminAuth::new(ADMIN_KEY.to_string()))
                    .route("/keys", web::get().to(guarded_handler)),
            ),
    )
    .await;

    let req = test::TestRequest::get().uri("/admin/keys").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 401);

    let snapshot = collector.snapshot();
    assert_eq!(snapshot.unauthorized_requests, 1);
    assert_eq!(snapshot.endpoints["GET /admin/keys"].errors, 1);
}
