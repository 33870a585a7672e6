use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bay_orchestrator::OrchestratorError;
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

/// Header carrying the retry hint on 503 responses, in milliseconds.
pub const RETRY_AFTER_MS: &str = "Retry-After-Ms";

/// Public error envelope: taxonomy code, message, and a correlation id for
/// log lookup. Storage and driver internals never appear here raw.
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub retry_after_ms: Option<u64>,
    pub correlation_id: Uuid,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        ApiError {
            status,
            code,
            message: message.into(),
            retry_after_ms: None,
            correlation_id: Uuid::new_v4(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "validation_error", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            warn!(
                code = self.code,
                correlation_id = %self.correlation_id,
                message = %self.message,
                "request failed"
            );
        }
        let body = Json(json!({
            "error": {
                "code": self.code,
                "message": self.message,
                "correlation_id": self.correlation_id,
            }
        }));
        let mut response = (self.status, body).into_response();
        if let Some(ms) = self.retry_after_ms {
            if let Ok(value) = HeaderValue::from_str(&ms.to_string()) {
                response.headers_mut().insert(RETRY_AFTER_MS, value);
            }
            let secs = ms.div_ceil(1_000).to_string();
            if let Ok(value) = HeaderValue::from_str(&secs) {
                response.headers_mut().insert(axum::http::header::RETRY_AFTER, value);
            }
        }
        response
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(e: OrchestratorError) -> Self {
        use OrchestratorError as E;
        let (status, code) = match &e {
            E::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            E::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            E::InvalidPath(_) => (StatusCode::BAD_REQUEST, "invalid_path"),
            E::CapabilityNotSupported(_) => {
                (StatusCode::BAD_REQUEST, "capability_not_supported")
            }
            E::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            E::SandboxExpired => (StatusCode::CONFLICT, "sandbox_expired"),
            E::SandboxTtlInfinite => (StatusCode::CONFLICT, "sandbox_ttl_infinite"),
            E::FileNotFound(_) => (StatusCode::NOT_FOUND, "file_not_found"),
            E::QuotaExceeded(_) => (StatusCode::TOO_MANY_REQUESTS, "quota_exceeded"),
            E::SessionNotReady { .. } => (StatusCode::SERVICE_UNAVAILABLE, "session_not_ready"),
            E::Ship(_) => (StatusCode::BAD_GATEWAY, "ship_error"),
            E::Timeout => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
            E::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };
        let retry_after_ms = match &e {
            E::SessionNotReady { retry_after_ms, .. } => Some(*retry_after_ms),
            _ => None,
        };
        ApiError {
            status,
            code,
            message: e.to_string(),
            retry_after_ms,
            correlation_id: Uuid::new_v4(),
        }
    }
}
