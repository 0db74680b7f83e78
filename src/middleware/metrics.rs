// HTTP metrics middleware.
//
// Times every request and aggregates status and latency per endpoint.
// 429 and 401 are the service's own decision outcomes, so they are
// tracked as first-class counters next to the usual 4xx/5xx split. The
// snapshot is served on /metrics/http, separate from the business
// counters on /metrics.

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error, HttpMessage,
};
use futures_util::future::LocalBoxFuture;
use serde::Serialize;
use std::collections::HashMap;
use std::future::{ready, Ready};
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::middleware::request_id::RequestIdent;

/// Shared per-process HTTP metrics store
#[derive(Debug, Clone, Default)]
pub struct HttpMetricsCollector {
    data: Arc<Mutex<HttpMetricsData>>,
}

#[derive(Debug, Default)]
pub(crate) struct HttpMetricsData {
    pub(crate) total_requests: u64,
    pub(crate) successful_requests: u64,
    pub(crate) unauthorized_requests: u64,
    pub(crate) rate_limited_requests: u64,
    pub(crate) client_errors: u64,
    pub(crate) server_errors: u64,
    pub(crate) total_response_time_ms: u64,
    pub(crate) min_response_time_ms: u64,
    pub(crate) max_response_time_ms: u64,
    pub(crate) endpoints: HashMap<String, EndpointData>,
}

#[derive(Debug, Default)]
pub(crate) struct EndpointData {
    pub(crate) requests: u64,
    pub(crate) errors: u64,
    pub(crate) rate_limited: u64,
    pub(crate) total_response_time_ms: u64,
}

impl HttpMetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, method: &str, path: &str, status_code: u16, response_time_ms: u64) {
        let mut data = self.data.lock().unwrap();

        data.total_requests += 1;
        data.total_response_time_ms += response_time_ms;

        if data.min_response_time_ms == 0 || response_time_ms < data.min_response_time_ms {
            data.min_response_time_ms = response_time_ms;
        }
        if response_time_ms > data.max_response_time_ms {
            data.max_response_time_ms = response_time_ms;
        }

        match status_code {
            200..=299 => data.successful_requests += 1,
            401 => data.unauthorized_requests += 1,
            429 => data.rate_limited_requests += 1,
            400..=499 => data.client_errors += 1,
            500..=599 => data.server_errors += 1,
            _ => {}
        }

        let endpoint = data
            .endpoints
            .entry(format!("{} {}", method, path))
            .or_default();
        endpoint.requests += 1;
        endpoint.total_response_time_ms += response_time_ms;
        if status_code == 429 {
            endpoint.rate_limited += 1;
        } else if status_code >= 400 {
            endpoint.errors += 1;
        }
    }

    /// Current snapshot with derived rates and per-endpoint averages
    pub fn snapshot(&self) -> HttpMetrics {
        let data = self.data.lock().unwrap();

        let avg_response_time_ms = if data.total_requests > 0 {
            data.total_response_time_ms / data.total_requests
        } else {
            0
        };

        let error_total =
            data.client_errors + data.server_errors + data.unauthorized_requests;
        let error_rate = if data.total_requests > 0 {
            (error_total as f64 / data.total_requests as f64) * 100.0
        } else {
            0.0
        };

        let endpoints = data
            .endpoints
            .iter()
            .map(|(endpoint, stats)| {
                (
                    endpoint.clone(),
                    EndpointMetrics {
                        requests: stats.requests,
                        errors: stats.errors,
                        rate_limited: stats.rate_limited,
                        avg_response_time_ms: if stats.requests > 0 {
                            stats.total_response_time_ms / stats.requests
                        } else {
                            0
                        },
                    },
                )
            })
            .collect();

        HttpMetrics {
            total_requests: data.total_requests,
            successful_requests: data.successful_requests,
            unauthorized_requests: data.unauthorized_requests,
            rate_limited_requests: data.rate_limited_requests,
            client_errors: data.client_errors,
            server_errors: data.server_errors,
            avg_response_time_ms,
            min_response_time_ms: data.min_response_time_ms,
            max_response_time_ms: data.max_response_time_ms,
            error_rate,
            endpoints,
        }
    }

    /// Reset all metrics (useful for testing)
    pub fn reset(&self) {
        let mut data = self.data.lock().unwrap();
        *data = HttpMetricsData::default();
    }

    /// Set test data (only available in test builds)
    #[cfg(test)]
    pub(crate) fn set_test_data<F>(&self, f: F)
    where
        F: FnOnce(&mut HttpMetricsData),
    {
        let mut data = self.data.lock().unwrap();
        f(&mut data);
    }
}

/// HTTP metrics snapshot
#[derive(Debug, Clone, Serialize)]
pub struct HttpMetrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub unauthorized_requests: u64,
    pub rate_limited_requests: u64,
    pub client_errors: u64,
    pub server_errors: u64,
    pub avg_response_time_ms: u64,
    pub min_response_time_ms: u64,
    pub max_response_time_ms: u64,
    pub error_rate: f64,
    pub endpoints: HashMap<String, EndpointMetrics>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EndpointMetrics {
    pub requests: u64,
    pub errors: u64,
    pub rate_limited: u64,
    pub avg_response_time_ms: u64,
}

/// Metrics middleware
pub struct HttpMetricsMiddleware {
    collector: HttpMetricsCollector,
}

impl HttpMetricsMiddleware {
    pub fn new(collector: HttpMetricsCollector) -> Self {
        Self { collector }
    }
}

impl<S, B> Transform<S, ServiceRequest> for HttpMetricsMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = HttpMetricsMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(HttpMetricsMiddlewareService {
            service: Rc::new(service),
            collector: self.collector.clone(),
        }))
    }
}

pub struct HttpMetricsMiddlewareService<S> {
    service: Rc<S>,
    collector: HttpMetricsCollector,
}

impl<S, B> Service<ServiceRequest> for HttpMetricsMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let svc = self.service.clone();
        let collector = self.collector.clone();
        let method = req.method().to_string();
        let path = req.path().to_string();
        let start_time = Instant::now();

        Box::pin(async move {
            // Request id for log correlation, set by the RequestId layer
            let request_id = req
                .extensions()
                .get::<RequestIdent>()
                .map(|id| id.as_str().to_string())
                .unwrap_or_else(|| "unknown".to_string());

            let response = svc.call(req).await?;

            let response_time_ms = start_time.elapsed().as_millis() as u64;
            let status_code = response.status().as_u16();

            collector.record(&method, &path, status_code, response_time_ms);

            tracing::info!(
                request_id = %request_id,
                method = %method,
                path = %path,
                status = status_code,
                response_time_ms = response_time_ms,
                "Request completed"
            );

            Ok(response)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collector_starts_empty() {
        let collector = HttpMetricsCollector::new();
        let metrics = collector.snapshot();

        assert_eq!(metrics.total_requests, 0);
        assert_eq!(metrics.error_rate, 0.0);
        assert!(metrics.endpoints.is_empty());
    }

    #[test]
    fn test_decision_statuses_are_split_out() {
        let collector = HttpMetricsCollector::new();

        collector.record("POST", "/api/validate", 200, 3);
        collector.record("POST", "/api/validate", 429, 2);
        collector.record("POST", "/api/validate", 401, 1);
        collector.record("GET", "/api/keys", 500, 10);

        let metrics = collector.snapshot();
        assert_eq!(metrics.total_requests, 4);
        assert_eq!(metrics.successful_requests, 1);
        assert_eq!(metrics.rate_limited_requests, 1);
        assert_eq!(metrics.unauthorized_requests, 1);
        assert_eq!(metrics.server_errors, 1);
        // 429 is a decision, not an error
        assert_eq!(metrics.error_rate, 50.0);
    }

    #[test]
    fn test_per_endpoint_latency_averaging() {
        let collector = HttpMetricsCollector::new();

        collector.record("POST", "/api/validate", 200, 50);
        collector.record("POST", "/api/validate", 200, 150);
        collector.record("GET", "/health", 200, 1);

        let metrics = collector.snapshot();
        let validate = &metrics.endpoints["POST /api/validate"];
        assert_eq!(validate.requests, 2);
        assert_eq!(validate.avg_response_time_ms, 100);
        assert_eq!(metrics.endpoints["GET /health"].requests, 1);
    }

    #[test]
    fn test_endpoint_errors_exclude_rate_limits() {
        let collector = HttpMetricsCollector::new();

        collector.record("POST", "/api/validate", 429, 1);
        collector.record("POST", "/api/validate", 503, 1);

        let metrics = collector.snapshot();
        let validate = &metrics.endpoints["POST /api/validate"];
        assert_eq!(validate.rate_limited, 1);
        assert_eq!(validate.errors, 1);
    }

    #[test]
    fn test_min_max_response_times() {
        let collector = HttpMetricsCollector::new();

        collector.set_test_data(|data| {
            data.total_requests = 3;
            data.total_response_time_ms = 300;
            data.min_response_time_ms = 50;
            data.max_response_time_ms = 150;
        });

        let metrics = collector.snapshot();
        assert_eq!(metrics.avg_response_time_ms, 100);
        assert_eq!(metrics.min_response_time_ms, 50);
        assert_eq!(metrics.max_response_time_ms, 150);
    }

    #[test]
    fn test_reset() {
        let collector = HttpMetricsCollector::new();
        collector.record("GET", "/health", 200, 1);
        assert_eq!(collector.snapshot().total_requests, 1);

        collector.reset();
        assert_eq!(collector.snapshot().total_requests, 0);
    }
}
