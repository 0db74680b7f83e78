// Admin-key guard for the key-management endpoints.
//
// Control-plane requests must present the configured admin key in
// X-Admin-Key. The public decision endpoint and the health probes are
// mounted outside the guarded scope. Comparison is constant-time to keep
// the admin key unguessable through timing.

use actix_web::{
    body::BoxBody,
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error, HttpResponse,
};
use futures_util::future::LocalBoxFuture;
use std::future::{ready, Ready};
use std::rc::Rc;

pub struct AdminAuth {
    admin_api_key: String,
}

impl AdminAuth {
    pub fn new(admin_api_key: String) -> Self {
        Self { admin_api_key }
    }
}

impl<S> Transform<S, ServiceRequest> for AdminAuth
where
    S: Service<ServiceRequest, Response = ServiceResponse<BoxBody>, Error = Error> + 'static,
    S::Future: 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type InitError = ();
    type Transform = AdminAuthMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(AdminAuthMiddleware {
            service: Rc::new(service),
            admin_api_key: self.admin_api_key.clone(),
        }))
    }
}

pub struct AdminAuthMiddleware<S> {
    service: Rc<S>,
    admin_api_key: String,
}

impl<S> Service<ServiceRequest> for AdminAuthMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<BoxBody>, Error = Error> + 'static,
    S::Future: 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let expected = self.admin_api_key.clone();

        Box::pin(async move {
            let presented = req
                .headers()
                .get("X-Admin-Key")
                .and_then(|value| value.to_str().ok());

            let authorized = presented.is_some_and(|key| constant_time_eq(key, &expected));

            if !authorized {
                let response = HttpResponse::Unauthorized().json(serde_json::json!({
                    "error": {
                        "code": "UNAUTHORIZED",
                        "message": "Missing or invalid X-Admin-Key header",
                    }
                }));
                return Ok(req.into_response(response));
            }

            service.call(req).await
        })
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq("secret", "secret"));
        assert!(!constant_time_eq("secret", "secrej"));
        assert!(!constant_time_eq("secret", "secret2"));
        assert!(!constant_time_eq("", "x"));
    }
}
