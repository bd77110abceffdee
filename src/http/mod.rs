//! HTTP layer.
//!
//! Axum router with, from the outside in:
//! - permissive CORS
//! - request tracing
//! - panic catching
//! - security headers
//! - gzip compression
//! - per-IP rate limiting
//! - JWT authentication
//! - production error redaction

pub mod error;
pub mod rate_limit;
pub mod routes;
pub mod security_headers;
pub mod server;

pub use error::ApiError;
pub use server::HttpServer;

use crate::auth::{JwtAuth, jwt_middleware};
use crate::config::{Config, RunMode};
use crate::db::Database;
use axum::response::IntoResponse;
use axum::{Router, middleware};
use rate_limit::{RateLimiter, rate_limit_middleware};
use routes::Resource;
use std::any::Any;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub auth: Arc<JwtAuth>,
    pub limiter: Arc<RateLimiter>,
    pub run_mode: RunMode,
}

impl AppState {
    pub fn new(config: &Config, db: Database) -> Self {
        Self {
            db,
            auth: Arc::new(JwtAuth::new(&config.jwt_secret)),
            limiter: Arc::new(RateLimiter::new(
                config.rate_limit_max,
                config.rate_limit_window(),
            )),
            run_mode: config.run_mode,
        }
    }
}

/// Assemble the full application: routes plus the middleware stack.
pub fn build_router(state: AppState) -> Router {
    let run_mode = state.run_mode;

    let mut app = Router::new().merge(routes::health::router());
    for resource in Resource::ALL {
        app = app.nest(&resource.mount_path(), routes::resources::router(resource));
    }

    app.fallback(error::not_found)
        .layer(
            ServiceBuilder::new()
                .layer(CorsLayer::permissive())
                // CORS needs a response body with a default value.
                .map_response(IntoResponse::into_response)
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                        .on_response(DefaultOnResponse::new().level(Level::INFO)),
                )
                .layer(CatchPanicLayer::custom(
                    move |panic: Box<dyn Any + Send + 'static>| {
                        error::panic_response(run_mode, panic)
                    },
                ))
                .layer(middleware::from_fn(security_headers::security_headers))
                .layer(CompressionLayer::new())
                .layer(middleware::from_fn_with_state(
                    state.limiter.clone(),
                    rate_limit_middleware,
                ))
                .layer(middleware::from_fn_with_state(
                    state.auth.clone(),
                    jwt_middleware,
                ))
                .layer(middleware::from_fn_with_state(
                    run_mode,
                    error::redact_errors,
                )),
        )
        .with_state(state)
}
