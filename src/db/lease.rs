//! Transactional connection leases.
//!
//! A [`Lease`] owns one pooled connection for the duration of a transaction.
//! It is created by [`crate::db::Database::acquire`], which issues `BEGIN`
//! before handing it out, and ends with [`Lease::release`], which puts the
//! connection back in the state a fresh borrower expects.
//!
//! # Lifecycle
//!
//! ```text
//! acquire ─► BEGIN ─┬─ ok ──► Leased ── query/commit/rollback ──► release ─► pool
//!                   └─ err ─► release ─► pool, error returned
//! ```
//!
//! An idle watchdog is armed for the whole lifetime of the lease and logs a
//! warning if the lease outlives the configured threshold.

use crate::db::backend::LeasedConnection;
use crate::db::watchdog::{LastStatement, Watchdog};
use crate::error::{DbError, DbResult};
use crate::models::{QueryParam, QueryResult};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Counters shared by every lease of one pool.
#[derive(Debug, Default)]
pub struct LeaseCounters {
    pub(crate) active: AtomicU64,
    pub(crate) acquired: AtomicU64,
    pub(crate) watchdog_trips: Arc<AtomicU64>,
}

impl LeaseCounters {
    pub fn active(&self) -> u64 {
        self.active.load(Ordering::Relaxed)
    }

    pub fn acquired(&self) -> u64 {
        self.acquired.load(Ordering::Relaxed)
    }

    pub fn watchdog_trips(&self) -> u64 {
        self.watchdog_trips.load(Ordering::Relaxed)
    }
}

/// How a statement changes the transaction state of its connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransactionEffect {
    Begins,
    Ends,
    None,
}

/// Classify a statement by its leading keywords.
pub(crate) fn transaction_effect(sql: &str) -> TransactionEffect {
    let mut words = sql
        .trim_start()
        .split(|c: char| c.is_whitespace() || c == ';')
        .filter(|w| !w.is_empty())
        .map(|w| w.to_ascii_uppercase());

    match words.next().as_deref() {
        Some("BEGIN") => TransactionEffect::Begins,
        Some("START") if words.next().as_deref() == Some("TRANSACTION") => {
            TransactionEffect::Begins
        }
        Some("COMMIT") | Some("END") | Some("ABORT") => TransactionEffect::Ends,
        Some("ROLLBACK") => match words.next().as_deref() {
            // ROLLBACK TO [SAVEPOINT] keeps the transaction open
            Some("TO") => TransactionEffect::None,
            _ => TransactionEffect::Ends,
        },
        _ => TransactionEffect::None,
    }
}

/// Exclusive ownership of one pooled connection.
pub struct Lease<C: LeasedConnection> {
    id: String,
    conn: Option<C>,
    last_statement: LastStatement,
    in_transaction: bool,
    statement_timeout: Option<Duration>,
    acquired_at: Instant,
    watchdog: Watchdog,
    counters: Arc<LeaseCounters>,
}

impl<C: LeasedConnection> std::fmt::Debug for Lease<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("id", &self.id)
            .field("in_transaction", &self.in_transaction)
            .field("last_statement", &self.last_statement())
            .field("held_for", &self.held_for())
            .finish_non_exhaustive()
    }
}

impl<C: LeasedConnection> Lease<C> {
    /// Wrap a freshly checked-out connection and arm its watchdog.
    fn new(
        conn: C,
        idle_warning: Duration,
        statement_timeout: Option<Duration>,
        counters: Arc<LeaseCounters>,
    ) -> Self {
        let id = generate_lease_id();
        let last_statement = LastStatement::default();
        let watchdog = Watchdog::arm(
            id.clone(),
            idle_warning,
            last_statement.clone(),
            counters.watchdog_trips.clone(),
        );
        counters.active.fetch_add(1, Ordering::Relaxed);
        counters.acquired.fetch_add(1, Ordering::Relaxed);
        Self {
            id,
            conn: Some(conn),
            last_statement,
            in_transaction: false,
            statement_timeout,
            acquired_at: Instant::now(),
            watchdog,
            counters,
        }
    }

    /// Wrap `conn` and open a transaction on it.
    ///
    /// If `BEGIN` fails the connection is released before the error is
    /// returned; the caller never sees the lease.
    pub(crate) async fn begin(
        conn: C,
        idle_warning: Duration,
        statement_timeout: Option<Duration>,
        counters: Arc<LeaseCounters>,
    ) -> DbResult<Self> {
        let mut lease = Self::new(conn, idle_warning, statement_timeout, counters);
        match lease.query("BEGIN", &[]).await {
            Ok(_) => {
                debug!(lease_id = %lease.id, "Lease acquired, transaction started");
                Ok(lease)
            }
            Err(e) => {
                error!(lease_id = %lease.id, error = %e, "Failed to begin transaction");
                lease.release().await;
                Err(e)
            }
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Text of the most recent statement issued through this lease.
    pub fn last_statement(&self) -> Option<String> {
        self.last_statement
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }

    /// Run a statement on the leased connection.
    ///
    /// While a statement that opens a transaction is in flight the lease
    /// counts as inside one, so a lease dropped mid-`BEGIN` is rolled back.
    /// A transaction is only considered closed once the closing statement
    /// succeeds.
    pub async fn query(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<QueryResult> {
        if let Ok(mut last) = self.last_statement.lock() {
            *last = Some(sql.to_string());
        }
        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| DbError::transaction("Lease already released", self.id.clone()))?;

        let effect = transaction_effect(sql);
        let was_in_transaction = self.in_transaction;
        if effect == TransactionEffect::Begins {
            self.in_transaction = true;
        }

        let result = match self.statement_timeout {
            Some(limit) => match timeout(limit, conn.execute(sql, params)).await {
                Ok(result) => result,
                Err(_) => Err(DbError::timeout(
                    "query execution",
                    limit.as_millis() as u64,
                )),
            },
            None => conn.execute(sql, params).await,
        };

        match (&result, effect) {
            (Ok(_), TransactionEffect::Ends) => self.in_transaction = false,
            // A timed-out statement may still have taken effect.
            (Err(DbError::Timeout { .. }), _) => {}
            (Err(_), TransactionEffect::Begins) => self.in_transaction = was_in_transaction,
            _ => {}
        }
        debug!(
            lease_id = %self.id,
            sql = %sql,
            ok = result.is_ok(),
            "Executed on lease"
        );
        result
    }

    /// Commit the open transaction.
    pub async fn commit(&mut self) -> DbResult<()> {
        self.require_transaction()?;
        self.query("COMMIT", &[]).await?;
        Ok(())
    }

    /// Roll back the open transaction.
    pub async fn rollback(&mut self) -> DbResult<()> {
        self.require_transaction()?;
        self.query("ROLLBACK", &[]).await?;
        Ok(())
    }

    fn require_transaction(&self) -> DbResult<()> {
        if self.in_transaction {
            Ok(())
        } else {
            Err(DbError::transaction(
                "No transaction in progress",
                self.id.clone(),
            ))
        }
    }

    /// Return the connection to the pool.
    ///
    /// The watchdog is disarmed first. A transaction left open is rolled
    /// back so the next borrower starts clean; if that rollback fails the
    /// connection is closed instead of being returned.
    ///
    /// The connection stays owned by the lease until the rollback finishes;
    /// if this future is dropped midway, the lease's drop cleanup takes over.
    pub async fn release(mut self) {
        self.watchdog.disarm();
        let held_ms = self.held_for().as_millis() as u64;

        if self.in_transaction {
            warn!(
                lease_id = %self.id,
                "Lease released with an open transaction, rolling back"
            );
            let Some(conn) = self.conn.as_mut() else {
                return;
            };
            if let Err(e) = conn.execute("ROLLBACK", &[]).await {
                error!(
                    lease_id = %self.id,
                    error = %e,
                    "Rollback on release failed, discarding connection"
                );
                if let Some(conn) = self.conn.take() {
                    self.counters.active.fetch_sub(1, Ordering::Relaxed);
                    conn.discard().await;
                }
                return;
            }
            self.in_transaction = false;
        }

        if let Some(conn) = self.conn.take() {
            self.counters.active.fetch_sub(1, Ordering::Relaxed);
            drop(conn);
            debug!(lease_id = %self.id, held_ms, "Lease released");
        }
    }
}

impl<C: LeasedConnection> Drop for Lease<C> {
    fn drop(&mut self) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };
        self.watchdog.disarm();
        self.counters.active.fetch_sub(1, Ordering::Relaxed);

        warn!(
            lease_id = %self.id,
            in_transaction = self.in_transaction,
            "Lease dropped without release - consider calling release()"
        );

        if !self.in_transaction {
            return;
        }

        // The rollback needs the runtime; without one the connection is
        // closed rather than returned mid-transaction.
        let lease_id = self.id.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    match conn.execute("ROLLBACK", &[]).await {
                        Ok(_) => info!(lease_id = %lease_id, "Rolled back dropped lease"),
                        Err(e) => {
                            error!(
                                lease_id = %lease_id,
                                error = %e,
                                "Rollback of dropped lease failed, discarding connection"
                            );
                            conn.discard().await;
                        }
                    }
                });
            }
            Err(_) => {
                error!(
                    lease_id = %lease_id,
                    "No runtime to roll back dropped lease, closing connection"
                );
                conn.abandon();
            }
        }
    }
}

/// Generate a unique lease ID.
fn generate_lease_id() -> String {
    format!("lease_{}", uuid::Uuid::new_v4().simple())
}
