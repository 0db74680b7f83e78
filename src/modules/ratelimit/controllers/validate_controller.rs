// HTTP handler for the public decision endpoint.
//
// POST /api/validate takes a plaintext key plus optional identifier and
// cost, and answers with the current window's limit, remaining budget and
// reset time. Every decision response also carries the X-RateLimit-*
// headers; integer header values are rendered as decimal strings.

use std::sync::Arc;

use actix_web::{web, HttpMessage, HttpRequest, HttpResponse};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{AppError, Result};
use crate::middleware::request_id::RequestIdent;
use crate::modules::ratelimit::engine::{Decision, DecisionEngine};
use crate::modules::usage::models::RequestContext;

/// Request body for the decision endpoint. `cost` and `requests` are
/// aliases; `cost` wins when both are present.
#[derive(Debug, Deserialize)]
pub struct ValidateRequest {
    pub api_key: String,

    /// Optional sub-user scope: each identifier gets its own counter
    #[serde(default)]
    pub identifier: Option<String>,

    #[serde(default)]
    pub cost: Option<i64>,

    #[serde(default)]
    pub requests: Option<i64>,
}

impl ValidateRequest {
    pub fn effective_cost(&self) -> i64 {
        self.cost.or(self.requests).unwrap_or(1)
    }
}

#[derive(Debug, Serialize)]
pub struct ValidateResponse {
    pub allowed: bool,
    pub limit: i64,
    pub remaining: i64,
    /// RFC3339 timestamp of the earliest guaranteed-success retry
    pub reset_time: String,
    pub reset_in_seconds: i64,
    pub retry_after: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub degraded: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

impl ValidateResponse {
    pub fn from_decision(decision: &Decision) -> Self {
        let reset_in_seconds = (decision.reset_at - Utc::now()).num_seconds().max(0);
        Self {
            allowed: decision.allowed,
            limit: decision.limit,
            remaining: decision.remaining,
            reset_time: decision.reset_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            reset_in_seconds,
            retry_after: if decision.allowed {
                None
            } else {
                Some(decision.retry_after)
            },
            degraded: if decision.degraded { Some(true) } else { None },
            error: if decision.allowed {
                None
            } else {
                Some(ErrorBody {
                    code: "RATE_LIMIT_EXCEEDED",
                    message: format!(
                        "Rate limit of {} requests exceeded, retry after {} seconds",
                        decision.limit, decision.retry_after
                    ),
                })
            },
        }
    }
}

pub async fn validate(
    engine: web::Data<Arc<DecisionEngine>>,
    req: HttpRequest,
    body: web::Json<ValidateRequest>,
) -> Result<HttpResponse> {
    let cost = body.effective_cost();
    if cost < 1 {
        return Err(AppError::validation("cost must be at least 1"));
    }

    let ctx = RequestContext {
        endpoint: req.path().to_string(),
        method: req.method().to_string(),
        client_ip: req.peer_addr().map(|addr| addr.ip().to_string()),
        country: None,
        request_bytes: req
            .headers()
            .get(actix_web::http::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
        request_id: req
            .extensions()
            .get::<RequestIdent>()
            .map(|id| id.as_str().to_string()),
    };

    let decision = engine
        .validate(&body.api_key, body.identifier.as_deref(), cost, &ctx)
        .await?;

    Ok(decision_http_response(&decision))
}

/// Render a decision with its rate-limit headers. Header values are the
/// decimal string representation of the integers.
pub fn decision_http_response(decision: &Decision) -> HttpResponse {
    let response = ValidateResponse::from_decision(decision);

    let mut builder = if decision.allowed {
        HttpResponse::Ok()
    } else {
        HttpResponse::TooManyRequests()
    };

    builder
        .insert_header(("X-RateLimit-Limit", decision.limit.to_string()))
        .insert_header(("X-RateLimit-Remaining", decision.remaining.to_string()))
        .insert_header((
            "X-RateLimit-Reset",
            decision.reset_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        ));

    if !decision.allowed {
        builder.insert_header(("Retry-After", decision.retry_after.to_string()));
    }

    builder.json(response)
}

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/validate", web::post().to(validate));
}
