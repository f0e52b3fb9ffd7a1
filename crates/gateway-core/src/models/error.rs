//! Unified error taxonomy for client-facing responses (§7).

use actix_web::HttpResponse;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    // --- client errors ---
    #[error("Authentication required")]
    Unauthenticated,
    #[error("Invalid token")]
    InvalidToken,
    #[error("Forbidden")]
    Forbidden,
    #[error("Rate limit exceeded")]
    RateLimited { retry_after_seconds: u64 },
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Circuit breaker is open")]
    CircuitOpen,
    #[error("Too many in-flight requests")]
    TooManyInFlight,

    // --- upstream errors ---
    #[error("Upstream dial failed: {0}")]
    DialFailed(String),
    #[error("Request timeout")]
    Timeout,
    #[error("Upstream returned {status}: {message}")]
    UpstreamStatus { status: u16, message: String },
    #[error("gRPC status {code}: {message}")]
    GrpcStatus { code: i32, message: String },

    // --- configuration errors ---
    #[error("No route matches {method} {path}")]
    RouteNotFound { method: String, path: String },
    #[error("Protocol mismatch for route {path}")]
    ProtocolMismatch { path: String },
    #[error("Invalid route configuration: {0}")]
    Config(String),

    // --- internal errors ---
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Render `error_handling` overrides (per-status message, else
    /// `default_message`) over the default body, per §4.7 "Response
    /// shaping": a configured template replaces the body verbatim
    /// (`text/plain`, not JSON-wrapped); absent a template, fall back to
    /// the default JSON error body.
    pub fn render_with_template(&self, status: u16, template: Option<&str>) -> HttpResponse {
        let builder_status = actix_web::http::StatusCode::from_u16(status)
            .unwrap_or(actix_web::http::StatusCode::BAD_GATEWAY);
        match template {
            Some(message) => HttpResponse::build(builder_status)
                .content_type("text/plain")
                .insert_header(("Content-Length", message.len().to_string()))
                .body(message.to_string()),
            None => HttpResponse::build(builder_status).json(json!({ "error": self.to_string() })),
        }
    }
}

impl actix_web::error::ResponseError for GatewayError {
    fn error_response(&self) -> HttpResponse {
        let message = self.to_string();
        match self {
            GatewayError::Unauthenticated | GatewayError::InvalidToken => {
                HttpResponse::Unauthorized().json(json!({ "error": message }))
            }
            GatewayError::Forbidden => HttpResponse::Forbidden().json(json!({ "error": message })),
            GatewayError::RateLimited {
                retry_after_seconds,
            } => HttpResponse::TooManyRequests()
                .insert_header(("Retry-After", retry_after_seconds.to_string()))
                .json(json!({ "error": "Rate limit exceeded" })),
            GatewayError::InvalidRequest(_) => {
                HttpResponse::BadRequest().json(json!({ "error": message }))
            }
            GatewayError::CircuitOpen => HttpResponse::ServiceUnavailable()
                .insert_header(("X-Circuit-Breaker", "open"))
                .json(json!({ "error": message })),
            GatewayError::TooManyInFlight => {
                HttpResponse::TooManyRequests().json(json!({ "error": message }))
            }
            GatewayError::DialFailed(_) => {
                HttpResponse::BadGateway().json(json!({ "error": message }))
            }
            GatewayError::Timeout => {
                HttpResponse::GatewayTimeout().json(json!({ "error": message }))
            }
            GatewayError::UpstreamStatus { status, .. } => {
                let code = actix_web::http::StatusCode::from_u16(*status)
                    .unwrap_or(actix_web::http::StatusCode::BAD_GATEWAY);
                HttpResponse::build(code).json(json!({ "error": message }))
            }
            GatewayError::GrpcStatus { code, .. } => {
                let http_status = crate::services::grpc::grpc_code_to_http(*code);
                let status = actix_web::http::StatusCode::from_u16(http_status)
                    .unwrap_or(actix_web::http::StatusCode::INTERNAL_SERVER_ERROR);
                HttpResponse::build(status).json(json!({ "error": message }))
            }
            GatewayError::RouteNotFound { .. } => {
                HttpResponse::NotFound().json(json!({ "error": message }))
            }
            GatewayError::ProtocolMismatch { .. } | GatewayError::Config(_) => {
                HttpResponse::BadRequest().json(json!({ "error": message }))
            }
            GatewayError::Internal(_) => {
                HttpResponse::InternalServerError().json(json!({ "error": message }))
            }
        }
    }
}
