//! API error type and the production redaction of 500 bodies.
//!
//! Handlers return [`ApiError`]. Server-side failures become a plain-text
//! 500 carrying the error message; [`redact_errors`] swaps that body for a
//! generic one when running in production. Panics get the same treatment
//! through [`panic_response`].

use crate::config::RunMode;
use crate::error::DbError;
use axum::{
    Json,
    body::Body,
    extract::State,
    http::{Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::any::Any;
use tracing::error;

/// Body sent in place of error details in production.
pub const REDACTED_MESSAGE: &str = "Something went wrong!";

/// Body of the 404 fallback.
pub const NOT_FOUND_MESSAGE: &str = "Resource not found";

/// Marks a response as an unhandled server error eligible for redaction.
#[derive(Debug, Clone)]
pub struct ServerFault;

/// API error type with automatic HTTP status mapping
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Query or pool failure (500)
    #[error(transparent)]
    Database(#[from] DbError),

    /// No row with the requested id (404)
    #[error("{resource} '{id}' not found")]
    NotFound { resource: &'static str, id: String },

    /// Bad request parameters (400)
    #[error("{0}")]
    BadRequest(String),

    /// Anything else that went wrong server-side (500)
    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            Self::NotFound { .. } => (
                StatusCode::NOT_FOUND,
                Json(json!({
                    "error": "not_found",
                    "message": self.to_string()
                })),
            )
                .into_response(),
            Self::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "error": "bad_request",
                    "message": message
                })),
            )
                .into_response(),
            Self::Database(_) | Self::Internal(_) => {
                error!(error = %self, "Request failed");
                server_fault(&self.to_string())
            }
        }
    }
}

/// Plain-text 500 with the message exposed, marked for redaction.
fn server_fault(message: &str) -> Response {
    let mut response = (
        StatusCode::INTERNAL_SERVER_ERROR,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        format!("Error: {message}"),
    )
        .into_response();
    response.extensions_mut().insert(ServerFault);
    response
}

fn redacted() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        REDACTED_MESSAGE,
    )
        .into_response()
}

/// Hide server error details from clients in production.
pub async fn redact_errors(
    State(run_mode): State<RunMode>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let response = next.run(request).await;
    if run_mode.is_production() && response.extensions().get::<ServerFault>().is_some() {
        return redacted();
    }
    response
}

/// Response for a handler that panicked.
pub fn panic_response(run_mode: RunMode, panic: Box<dyn Any + Send + 'static>) -> Response {
    let message = if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "handler panicked".to_string()
    };
    error!(panic = %message, "Handler panicked");

    if run_mode.is_production() {
        redacted()
    } else {
        server_fault(&message)
    }
}

/// Fallback for unmatched routes.
pub async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, NOT_FOUND_MESSAGE).into_response()
}
