// HTTP handlers for tenant-scoped key management.
//
// Endpoints (admin-guarded):
// - POST   /keys               - Create key (returns plaintext once)
// - GET    /keys               - List keys with pagination
// - GET    /keys/{id}          - Get key by ID
// - PUT    /keys/{id}          - Update name/tier/limits/status/metadata
// - POST   /keys/{id}/rotate   - Rotate plaintext (returns new one once)
// - DELETE /keys/{id}          - Soft-delete
// - GET    /keys/{id}/usage    - Recent usage logs
// - GET    /keys/{id}/violations - Recent violations

use std::sync::Arc;

use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::Result;
use crate::modules::api_keys::models::{ApiKey, KeyStatus, Tier};
use crate::modules::api_keys::services::api_key_service::{ApiKeyService, KeyUpdate};

/// Rate-limit shape accepted on create/update: either the integer form or
/// the flat `{requests, window, burst}` object. Both normalize to the
/// integer fields internally; `burst` feeds the token-bucket capacity.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RateLimitSpec {
    Requests(i64),
    Flat {
        requests: i64,
        #[serde(default)]
        window: Option<i64>,
        #[serde(default)]
        burst: Option<i64>,
    },
}

impl RateLimitSpec {
    /// (rate_limit, rate_window, burst)
    pub fn normalize(&self) -> (i64, Option<i64>, Option<i64>) {
        match self {
            RateLimitSpec::Requests(n) => (*n, None, None),
            RateLimitSpec::Flat {
                requests,
                window,
                burst,
            } => (*requests, *window, *burst),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateKeyRequest {
    pub name: String,
    pub tier: Tier,
    #[serde(default)]
    pub rate_limit: Option<RateLimitSpec>,
    #[serde(default)]
    pub rate_window: Option<i64>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateKeyRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub tier: Option<Tier>,
    #[serde(default)]
    pub status: Option<KeyStatus>,
    #[serde(default)]
    pub rate_limit: Option<RateLimitSpec>,
    #[serde(default)]
    pub rate_window: Option<i64>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

fn default_limit() -> u32 {
    50
}

/// Key representation without secrets; the hash never leaves the server
#[derive(Debug, Serialize)]
pub struct ApiKeyResponse {
    pub id: String,
    pub name: String,
    pub tier: Tier,
    pub status: KeyStatus,
    pub rate_limit: i64,
    pub rate_window: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub burst: Option<i64>,
    pub total_usage: i64,
    pub last_used_at: Option<DateTime<Utc>>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ApiKey> for ApiKeyResponse {
    fn from(key: ApiKey) -> Self {
        Self {
            id: key.id,
            name: key.name,
            tier: key.tier,
            status: key.status,
            rate_limit: key.rate_limit,
            rate_window: key.rate_window,
            burst: key.burst,
            total_usage: key.total_usage,
            last_used_at: key.last_used_at,
            metadata: key.metadata,
            created_at: key.created_at,
            updated_at: key.updated_at,
        }
    }
}

/// Create/rotate response: the only places plaintext ever appears
#[derive(Debug, Serialize)]
pub struct IssuedKeyResponse {
    pub key: String,
    #[serde(flatten)]
    pub api_key: ApiKeyResponse,
}

pub async fn create_key(
    service: web::Data<Arc<ApiKeyService>>,
    body: web::Json<CreateKeyRequest>,
) -> Result<HttpResponse> {
    let body = body.into_inner();

    let (rate_limit, spec_window, burst) = match &body.rate_limit {
        Some(spec) => {
            let (limit, window, burst) = spec.normalize();
            (Some(limit), window, burst)
        }
        None => (None, None, None),
    };
    // explicit rate_window wins over the flat object's window
    let rate_window = body.rate_window.or(spec_window);

    let (key, plaintext) = service
        .create(body.name, body.tier, rate_limit, rate_window, burst, body.metadata)
        .await?;

    Ok(HttpResponse::Created().json(IssuedKeyResponse {
        key: plaintext,
        api_key: key.into(),
    }))
}

pub async fn list_keys(
    service: web::Data<Arc<ApiKeyService>>,
    query: web::Query<PageQuery>,
) -> Result<HttpResponse> {
    let keys = service.list(query.limit, query.offset).await?;
    let keys: Vec<ApiKeyResponse> = keys.into_iter().map(ApiKeyResponse::from).collect();
    Ok(HttpResponse::Ok().json(keys))
}

pub async fn get_key(
    service: web::Data<Arc<ApiKeyService>>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    let key = service.get(&path).await?;
    Ok(HttpResponse::Ok().json(ApiKeyResponse::from(key)))
}

pub async fn update_key(
    service: web::Data<Arc<ApiKeyService>>,
    path: web::Path<String>,
    body: web::Json<UpdateKeyRequest>,
) -> Result<HttpResponse> {
    let body = body.into_inner();

    let (rate_limit, spec_window, burst) = match &body.rate_limit {
        Some(spec) => {
            let (limit, window, burst) = spec.normalize();
            (Some(limit), window, burst)
        }
        None => (None, None, None),
    };

    let update = KeyUpdate {
        name: body.name,
        tier: body.tier,
        status: body.status,
        rate_limit,
        rate_window: body.rate_window.or(spec_window),
        burst,
        metadata: body.metadata,
    };

    let key = service.update(&path, update).await?;
    Ok(HttpResponse::Ok().json(ApiKeyResponse::from(key)))
}

pub async fn rotate_key(
    service: web::Data<Arc<ApiKeyService>>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    let (key, plaintext) = service.rotate(&path).await?;
    Ok(HttpResponse::Ok().json(IssuedKeyResponse {
        key: plaintext,
        api_key: key.into(),
    }))
}

pub async fn delete_key(
    service: web::Data<Arc<ApiKeyService>>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    service.delete(&path).await?;
    Ok(HttpResponse::NoContent().finish())
}

pub async fn key_usage(
    service: web::Data<Arc<ApiKeyService>>,
    path: web::Path<String>,
    query: web::Query<PageQuery>,
) -> Result<HttpResponse> {
    let logs = service.usage_history(&path, query.limit).await?;
    Ok(HttpResponse::Ok().json(logs))
}

pub async fn key_violations(
    service: web::Data<Arc<ApiKeyService>>,
    path: web::Path<String>,
    query: web::Query<PageQuery>,
) -> Result<HttpResponse> {
    let violations = service.violation_history(&path, query.limit).await?;
    Ok(HttpResponse::Ok().json(violations))
}

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/keys")
            .route("", web::post().to(create_key))
            .route("", web::get().to(list_keys))
            .route("/{id}", web::get().to(get_key))
            .route("/{id}", web::put().to(update_key))
            .route("/{id}/rotate", web::post().to(rotate_key))
            .route("/{id}", web::delete().to(delete_key))
            .route("/{id}/usage", web::get().to(key_usage))
            .route("/{id}/violations", web::get().to(key_violations)),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_spec_integer_form() {
        let spec: RateLimitSpec = serde_json::from_str("5000").unwrap();
        assert_eq!(spec.normalize(), (5000, None, None));
    }

    #[test]
    fn test_rate_limit_spec_flat_form() {
        let spec: RateLimitSpec =
            serde_json::from_str(r#"{"requests": 100, "window": 60, "burst": 150}"#).unwrap();
        assert_eq!(spec.normalize(), (100, Some(60), Some(150)));
    }
}
