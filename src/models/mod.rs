//! Data models for the fleet backend.
//!
//! This module re-exports the model types shared by the database layer and
//! the HTTP handlers.

pub mod query;

// Re-export commonly used types
pub use query::{ColumnMetadata, DEFAULT_ROW_LIMIT, MAX_ROW_LIMIT, QueryParam, QueryResult};
