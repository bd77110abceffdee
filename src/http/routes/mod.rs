//! HTTP route handlers.

pub mod health;
pub mod resources;

pub use resources::Resource;
