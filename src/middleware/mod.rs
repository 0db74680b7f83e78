pub mod admin_auth;
pub mod metrics;
pub mod request_id;

pub use admin_auth::AdminAuth;
pub use metrics::{HttpMetricsCollector, HttpMetricsMiddleware};
pub use request_id::{RequestId, RequestIdent};
