// Wire-shape checks for the decision endpoint: field names, null
// handling, and the rate-limit headers rendered as decimal strings.

use chrono::{Duration, Utc};

use viva_limiter::modules::ratelimit::controllers::validate_controller::{
    decision_http_response, ValidateRequest, ValidateResponse,
};
use viva_limiter::modules::ratelimit::engine::Decision;

fn allowed_decision() -> Decision {
    Decision {
        allowed: true,
        limit: 1_000,
        remaining: 999,
        reset_at: Utc::now() + Duration::seconds(60),
        retry_after: 0,
        degraded: false,
        violation_recorded: false,
    }
}

fn denied_decision() -> Decision {
    Decision {
        allowed: false,
        limit: 5,
        remaining: 0,
        reset_at: Utc::now() + Duration::seconds(42),
        retry_after: 42,
        degraded: false,
        violation_recorded: true,
    }
}

#[test]
fn test_allowed_body_shape() {
    let body = serde_json::to_value(ValidateResponse::from_decision(&allowed_decision())).unwrap();

    assert_eq!(body["allowed"], true);
    assert_eq!(body["limit"], 1_000);
    assert_eq!(body["remaining"], 999);
    assert!(body["reset_time"].is_string());
    assert!(body["reset_in_seconds"].as_i64().unwrap() <= 60);
    // retry_after is an explicit null when allowed
    assert!(body.get("retry_after").unwrap().is_null());
    // no error object and no degraded flag on a clean allow
    assert!(body.get("error").is_none());
    assert!(body.get("degraded").is_none());
}

#[test]
fn test_denied_body_shape() {
    let body = serde_json::to_value(ValidateResponse::from_decision(&denied_decision())).unwrap();

    assert_eq!(body["allowed"], false);
    assert_eq!(body["remaining"], 0);
    assert_eq!(body["retry_after"], 42);
    assert_eq!(body["error"]["code"], "RATE_LIMIT_EXCEEDED");
    assert!(body["error"]["message"].is_string());
}

#[test]
fn test_reset_time_is_rfc3339() {
    let response = ValidateResponse::from_decision(&allowed_decision());
    let parsed = chrono::DateTime::parse_from_rfc3339(&response.reset_time);
    assert!(parsed.is_ok(), "reset_time not RFC3339: {}", response.reset_time);
}

#[test]
fn test_degraded_allow_sets_flag() {
    let mut decision = allowed_decision();
    decision.degraded = true;

    let body = serde_json::to_value(ValidateResponse::from_decision(&decision)).unwrap();
    assert_eq!(body["degraded"], true);
}

#[actix_web::test]
async fn test_allowed_response_headers() {
    let response = decision_http_response(&allowed_decision());
    assert_eq!(response.status().as_u16(), 200);

    let headers = response.headers();
    assert_eq!(headers.get("X-RateLimit-Limit").unwrap(), "1000");
    assert_eq!(headers.get("X-RateLimit-Remaining").unwrap(), "999");
    // reset header is RFC3339, not an epoch integer
    let reset = headers.get("X-RateLimit-Reset").unwrap().to_str().unwrap();
    assert!(chrono::DateTime::parse_from_rfc3339(reset).is_ok());
    assert!(headers.get("Retry-After").is_none());
}

#[actix_web::test]
async fn test_denied_response_headers() {
    let response = decision_http_response(&denied_decision());
    assert_eq!(response.status().as_u16(), 429);

    let headers = response.headers();
    assert_eq!(headers.get("X-RateLimit-Limit").unwrap(), "5");
    assert_eq!(headers.get("X-RateLimit-Remaining").unwrap(), "0");
    assert_eq!(headers.get("Retry-After").unwrap(), "42");
}

#[test]
fn test_cost_wins_over_requests_alias() {
    let request: ValidateRequest =
        serde_json::from_str(r#"{"api_key": "viva_dev_x", "cost": 3, "requests": 9}"#).unwrap();
    assert_eq!(request.effective_cost(), 3);

    let request: ValidateRequest =
        serde_json::from_str(r#"{"api_key": "viva_dev_x", "requests": 9}"#).unwrap();
    assert_eq!(request.effective_cost(), 9);

    let request: ValidateRequest = serde_json::from_str(r#"{"api_key": "viva_dev_x"}"#).unwrap();
    assert_eq!(request.effective_cost(), 1);
}
