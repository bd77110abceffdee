//! Fleet Backend Library
//!
//! REST backend for a fleet service: a PostgreSQL pool with logged query
//! execution and watched transactional leases, served over an axum HTTP
//! stack with JWT authentication and rate limiting.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod http;
pub mod logging;
pub mod models;

#[cfg(test)]
pub(crate) mod testing;

pub use config::Config;
pub use db::Database;
pub use error::DbError;
