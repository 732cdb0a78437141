//! Gateway error taxonomy and its HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Result type for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Errors surfaced at the HTTP boundary.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Caller presented no usable credentials.
    #[error("authentication required: {0}")]
    Unauthenticated(String),

    /// Caller is known but not allowed to perform the request.
    #[error("access denied: {0}")]
    Forbidden(String),

    /// No route matched the method and path.
    #[error("no route for {method} {path}")]
    RouteNotFound { method: String, path: String },

    /// Client supplied invalid parameters.
    #[error("invalid request: {0}")]
    BadRequest(String),

    /// Dial or connect failure towards the cluster manager.
    #[error("cluster endpoint unreachable: {0}")]
    UpstreamUnreachable(String),

    /// Cluster manager answered with something we cannot use.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// Configuration error (startup only).
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// HTTP status reported to the caller.
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            GatewayError::Forbidden(_) => StatusCode::FORBIDDEN,
            GatewayError::RouteNotFound { .. } => StatusCode::NOT_FOUND,
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::UpstreamUnreachable(_) => StatusCode::BAD_GATEWAY,
            GatewayError::ProtocolViolation(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Config(_) | GatewayError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = serde_json::json!({
            "message": self.to_string(),
            "code": status.as_u16(),
        });

        (status, axum::Json(body)).into_response()
    }
}

impl From<crate::net::TransportError> for GatewayError {
    fn from(e: crate::net::TransportError) -> Self {
        match e {
            crate::net::TransportError::Tls(_) | crate::net::TransportError::Endpoint(_) => {
                GatewayError::Config(e.to_string())
            }
            _ => GatewayError::UpstreamUnreachable(e.to_string()),
        }
    }
}

impl From<crate::exec::HijackError> for GatewayError {
    fn from(e: crate::exec::HijackError) -> Self {
        use crate::exec::HijackError;
        match e {
            HijackError::Transport(t) => t.into(),
            HijackError::Upstream(_) | HijackError::Timeout { .. } => {
                GatewayError::UpstreamUnreachable(e.to_string())
            }
            HijackError::UnexpectedStatus { .. } | HijackError::Protocol(_) => {
                GatewayError::ProtocolViolation(e.to_string())
            }
            HijackError::InvalidSession(msg) => GatewayError::BadRequest(msg),
            HijackError::Teardown(_) => GatewayError::Internal(e.to_string()),
        }
    }
}
