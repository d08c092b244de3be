use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};

use crate::auth::VerifyError;
use crate::dispatch::Stage;

/// Request-time failures. Every variant renders as a JSON body
/// `{"error": <code>, "message": <text>}`; server-side detail is logged, not
/// returned.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Malformed request (bad path)
    #[error("bad request: {0}")]
    BadRequest(String),

    /// No route for the request path
    #[error("no route for path: {0}")]
    RouteNotFound(String),

    /// Method not accepted by an exact route
    #[error("method {method} not allowed on {path}")]
    MethodNotAllowed { method: String, path: String },

    /// Authentication failed (header, token, expiry, introspection)
    #[error("unauthorized: {0}")]
    Unauthorized(#[from] VerifyError),

    /// Upstream unreachable or broken response
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Upstream did not answer in time
    #[error("upstream timed out: {0}")]
    UpstreamTimeout(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Stable error code used in response bodies.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::BadRequest(_) => "bad_request",
            GatewayError::RouteNotFound(_) => "not_found",
            GatewayError::MethodNotAllowed { .. } => "method_not_allowed",
            GatewayError::Unauthorized(_) => "unauthorized",
            GatewayError::UpstreamUnavailable(_) => "upstream_unavailable",
            GatewayError::UpstreamTimeout(_) => "upstream_timeout",
            GatewayError::Internal(_) => "internal_error",
        }
    }

    /// Terminal dispatch stage this error leaves the request in.
    pub fn stage(&self) -> Stage {
        match self {
            GatewayError::BadRequest(_) | GatewayError::MethodNotAllowed { .. } => {
                Stage::RejectedBadRequest
            }
            GatewayError::RouteNotFound(_) => Stage::RejectedNotFound,
            GatewayError::Unauthorized(_) => Stage::RejectedUnauthorized,
            GatewayError::UpstreamUnavailable(_)
            | GatewayError::UpstreamTimeout(_)
            | GatewayError::Internal(_) => Stage::UpstreamFailed,
        }
    }

    /// Message safe to show to clients.
    fn public_message(&self) -> String {
        match self {
            GatewayError::BadRequest(msg) => msg.clone(),
            GatewayError::RouteNotFound(_) => "no route matches the request path".to_string(),
            GatewayError::MethodNotAllowed { method, .. } => {
                format!("method {} is not allowed on this route", method)
            }
            GatewayError::Unauthorized(e) => e.public_message().to_string(),
            GatewayError::UpstreamUnavailable(_) => "upstream service unavailable".to_string(),
            GatewayError::UpstreamTimeout(_) => "upstream service timed out".to_string(),
            GatewayError::Internal(_) => "an internal error occurred".to_string(),
        }
    }
}

impl ResponseError for GatewayError {
    fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::RouteNotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            GatewayError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            GatewayError::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            GatewayError::UpstreamTimeout(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        match self {
            GatewayError::UpstreamUnavailable(msg) | GatewayError::UpstreamTimeout(msg) => {
                tracing::error!("Upstream error: {}", msg);
            }
            GatewayError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
            }
            _ => {}
        }

        let mut builder = HttpResponse::build(self.status_code());
        if matches!(self, GatewayError::Unauthorized(_)) {
            builder.insert_header(("WWW-Authenticate", "Bearer"));
        }
        builder.json(serde_json::json!({
            "error": self.code(),
            "message": self.public_message(),
        }))
    }
}
