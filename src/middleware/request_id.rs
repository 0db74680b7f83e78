// Request identity propagation.
//
// Every request gets an ident, either honored from an upstream
// X-Request-ID or freshly generated. The typed RequestIdent lands in the
// request extensions so the validate controller can thread it through
// RequestContext into the decision engine's logs, the metrics layer
// reads it for correlation, and the response echoes it back so clients
// can quote it when reporting a disputed decision.

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::header::{HeaderName, HeaderValue},
    Error, HttpMessage,
};
use futures_util::future::LocalBoxFuture;
use std::future::{ready, Ready};
use uuid::Uuid;

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Typed request ident carried in the request extensions
#[derive(Debug, Clone)]
pub struct RequestIdent(String);

impl RequestIdent {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

pub struct RequestId;

impl<S, B> Transform<S, ServiceRequest> for RequestId
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = RequestIdService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequestIdService { service }))
    }
}

pub struct RequestIdService<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for RequestIdService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let ident = extract_or_generate(&req);
        req.extensions_mut().insert(RequestIdent(ident.clone()));

        let fut = self.service.call(req);

        Box::pin(async move {
            let mut res = fut.await?;

            // Echo the ident so callers can correlate a disputed decision
            if let Ok(value) = HeaderValue::from_str(&ident) {
                res.headers_mut()
                    .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
            }

            Ok(res)
        })
    }
}

/// Honor a sane upstream ident, otherwise mint a fresh UUID. Oversized or
/// non-ASCII values are replaced rather than propagated.
fn extract_or_generate(req: &ServiceRequest) -> String {
    req.headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|h| h.to_str().ok())
        .filter(|s| !s.is_empty() && s.len() <= 128)
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[test]
    fn test_upstream_ident_is_honored() {
        let req = TestRequest::default()
            .insert_header((REQUEST_ID_HEADER, "upstream-77"))
            .to_srv_request();
        assert_eq!(extract_or_generate(&req), "upstream-77");
    }

    #[test]
    fn test_missing_ident_generates_uuid() {
        let req = TestRequest::default().to_srv_request();
        let ident = extract_or_generate(&req);
        assert!(Uuid::parse_str(&ident).is_ok());
    }

    #[test]
    fn test_oversized_ident_is_replaced() {
        let oversized = "x".repeat(300);
        let req = TestRequest::default()
            .insert_header((REQUEST_ID_HEADER, oversized.as_str()))
            .to_srv_request();
        let ident = extract_or_generate(&req);
        assert_ne!(ident, oversized);
        assert!(Uuid::parse_str(&ident).is_ok());
    }
}
