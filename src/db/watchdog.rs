//! Idle-lease watchdog.
//!
//! A one-shot timer armed when a lease is created. If the lease is still
//! held when it fires, a warning is logged. The connection is left alone:
//! this is a tripwire for leaked leases, not an enforcement mechanism.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::warn;

/// Last statement issued on a lease, shared with its watchdog.
pub(crate) type LastStatement = Arc<Mutex<Option<String>>>;

pub(crate) struct Watchdog {
    handle: Option<JoinHandle<()>>,
}

impl Watchdog {
    /// Schedule the warning for `threshold` from now.
    pub(crate) fn arm(
        lease_id: String,
        threshold: Duration,
        last_statement: LastStatement,
        trips: Arc<AtomicU64>,
    ) -> Self {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(threshold).await;
            let last = last_statement
                .lock()
                .map(|guard| guard.clone())
                .unwrap_or_default();
            trips.fetch_add(1, Ordering::Relaxed);
            warn!(
                lease_id = %lease_id,
                threshold_ms = threshold.as_millis() as u64,
                last_statement = last.as_deref().unwrap_or("<none>"),
                "Lease held past idle threshold without release"
            );
        });
        Self {
            handle: Some(handle),
        }
    }

    /// Cancel the pending warning. Calling it again is a no-op.
    pub(crate) fn disarm(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.disarm();
    }
}
