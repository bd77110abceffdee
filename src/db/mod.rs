//! Database access layer.
//!
//! - [`Database`]: the shared PostgreSQL pool handle
//! - [`QueryExecutor`]: timed, logged single-statement execution
//! - [`Lease`]: a connection held for one transaction, with an idle watchdog
//! - [`spawn_idle_monitor`]: fault detection for idle connections

pub mod backend;
pub mod executor;
pub mod lease;
pub mod monitor;
pub(crate) mod params;
pub mod pool;
pub mod types;
mod watchdog;

pub use backend::{ConnectionSource, LeasedConnection};
pub use executor::QueryExecutor;
pub use lease::{Lease, LeaseCounters};
pub use monitor::spawn_idle_monitor;
pub use pool::{Database, DatabaseOptions, PgSource, PoolStatus};
