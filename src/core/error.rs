use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};

/// Application-wide Result type
pub type Result<T> = std::result::Result<T, AppError>;

/// Main application error type
#[derive(thiserror::Error, Debug)]
pub enum AppError {
    /// Validation errors for request payloads and business rules
    #[error("Validation error: {0}")]
    Validation(String),

    /// Durable store operation errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Fast store (Redis) transport errors
    #[error("Fast store error: {0}")]
    FastStore(String),

    /// Fast store unavailable and fail-open disabled
    #[error("Service degraded: {0}")]
    ServiceDegraded(String),

    /// Unknown API key (or soft-deleted)
    #[error("Invalid API key")]
    InvalidKey,

    /// API key exists but is suspended or revoked
    #[error("API key is {0}")]
    KeyDisabled(String),

    /// Rate limit exceeded. A decision, not a fault
    #[error("Rate limit exceeded, retry after {retry_after}s")]
    RateLimitExceeded { retry_after: i64 },

    /// Write pipeline queue at capacity
    #[error("Write queue saturated")]
    QueueSaturated,

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Unauthorized access to admin endpoints
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Configuration errors (fatal at startup)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// HTTP client errors (alert webhook delivery)
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Stable machine-readable code carried in every error response body.
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Database(_) => "DATABASE_ERROR",
            AppError::FastStore(_) => "FAST_STORE_ERROR",
            AppError::ServiceDegraded(_) => "SERVICE_DEGRADED",
            AppError::InvalidKey => "INVALID_API_KEY",
            AppError::KeyDisabled(_) => "KEY_DISABLED",
            AppError::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            AppError::QueueSaturated => "QUEUE_SATURATED",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Unauthorized(_) => "UNAUTHORIZED",
            AppError::Configuration(_) => "CONFIGURATION_ERROR",
            AppError::HttpClient(_) => "UPSTREAM_ERROR",
            AppError::Json(_) => "INVALID_JSON",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let status_code = self.status_code();

        // Sanitize error messages to prevent information disclosure
        let error_message = match self {
            AppError::Validation(msg) => msg.clone(),
            AppError::NotFound(msg) => msg.clone(),
            AppError::Unauthorized(msg) => msg.clone(),
            AppError::InvalidKey => "Invalid API key".to_string(),
            AppError::KeyDisabled(status) => format!("API key is {}", status),
            AppError::RateLimitExceeded { retry_after } => {
                format!("Rate limit exceeded, retry after {} seconds", retry_after)
            }
            AppError::ServiceDegraded(_) => "Rate limiting temporarily unavailable".to_string(),

            // Sanitize server errors (5xx) - don't expose internal details
            AppError::Database(_) => "A database error occurred".to_string(),
            AppError::FastStore(_) => "A backing store error occurred".to_string(),
            AppError::QueueSaturated => "Service is overloaded".to_string(),
            AppError::Configuration(_) => "A configuration error occurred".to_string(),
            AppError::Internal(_) => "An internal server error occurred".to_string(),
            AppError::HttpClient(_) => "An external service error occurred".to_string(),

            // JSON errors usually contain request details (safe to return)
            AppError::Json(err) => format!("Invalid JSON: {}", err),
        };

        // Log full error for debugging (with tracing)
        match self {
            AppError::Database(e) => {
                tracing::error!(error = %e, "Database error occurred");
            }
            AppError::FastStore(e) => {
                tracing::error!(error = %e, "Fast store error occurred");
            }
            AppError::ServiceDegraded(e) => {
                tracing::warn!(error = %e, "Serving degraded response");
            }
            AppError::Internal(e) => {
                tracing::error!(error = %e, "Internal error occurred");
            }
            _ => {}
        }

        HttpResponse::build(status_code).json(serde_json::json!({
            "error": {
                "code": self.error_code(),
                "message": error_message,
            }
        }))
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::FastStore(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::ServiceDegraded(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::InvalidKey => StatusCode::UNAUTHORIZED,
            AppError::KeyDisabled(_) => StatusCode::UNAUTHORIZED,
            AppError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::QueueSaturated => StatusCode::SERVICE_UNAVAILABLE,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::HttpClient(_) => StatusCode::BAD_GATEWAY,
            AppError::Json(_) => StatusCode::BAD_REQUEST,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

// Helper functions for common error scenarios
impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        AppError::NotFound(resource.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        AppError::Unauthorized(msg.into())
    }

    pub fn fast_store(msg: impl Into<String>) -> Self {
        AppError::FastStore(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        AppError::Internal(msg.into())
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        AppError::FastStore(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_path_status_codes() {
        assert_eq!(AppError::InvalidKey.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            AppError::KeyDisabled("suspended".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AppError::RateLimitExceeded { retry_after: 30 }.status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            AppError::ServiceDegraded("redis down".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(AppError::InvalidKey.error_code(), "INVALID_API_KEY");
        assert_eq!(
            AppError::RateLimitExceeded { retry_after: 1 }.error_code(),
            "RATE_LIMIT_EXCEEDED"
        );
        assert_eq!(
            AppError::ServiceDegraded(String::new()).error_code(),
            "SERVICE_DEGRADED"
        );
    }
}
