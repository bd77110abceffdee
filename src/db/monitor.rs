//! Background health check for idle pooled connections.

use crate::db::backend::ConnectionSource;
use crate::db::pool::Database;
use crate::error::DbError;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error};

/// Probe one idle connection every `interval`.
///
/// A failed probe means a connection nobody holds has broken underneath the
/// pool. The fault is logged and `on_fault` runs once; the monitor then stops.
/// It also stops once the pool is closed.
pub fn spawn_idle_monitor<S, F>(db: Database<S>, interval: Duration, on_fault: F) -> JoinHandle<()>
where
    S: ConnectionSource,
    F: FnOnce(&DbError) + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if db.is_closed() {
                debug!("Database pool closed, idle monitor stopping");
                return;
            }
            if let Err(e) = db.probe_idle().await {
                error!(error = %e, "Unexpected error on idle client");
                on_fault(&e);
                return;
            }
        }
    })
}
