//! Connection pool management.
//!
//! [`Database`] is the process-wide pool handle. It is built once at startup,
//! cloned into every component that needs it, and closed exactly once during
//! shutdown. Against PostgreSQL it is backed by [`PgSource`], a thin wrapper
//! over sqlx's `PgPool`.

use crate::config::DatabaseSettings;
use crate::db::backend::{ConnectionSource, LeasedConnection};
use crate::db::executor::QueryExecutor;
use crate::db::lease::{Lease, LeaseCounters};
use crate::db::params::bind_all;
use crate::db::types::RowToJson;
use crate::error::{DbError, DbResult};
use crate::models::{QueryParam, QueryResult};
use futures_util::TryStreamExt;
use serde::Serialize;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{Connection, Either, PgPool, Postgres};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Default upper bound on how long [`Database::close`] waits for connections.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// PostgreSQL connection source.
#[derive(Debug, Clone)]
pub struct PgSource {
    pool: PgPool,
    acquire_timeout: Duration,
}

impl PgSource {
    /// Build the pool without opening any connection.
    ///
    /// Connections are established on first use, so a database that is not
    /// reachable yet does not keep the server from starting.
    pub fn connect_lazy(settings: &DatabaseSettings) -> Self {
        let mut options = PgConnectOptions::new()
            .host(&settings.db_host)
            .port(settings.db_port)
            .username(&settings.db_user)
            .database(&settings.db_database);
        if let Some(password) = &settings.db_password {
            options = options.password(password);
        }

        let pool = PgPoolOptions::new()
            .max_connections(settings.db_max_clients)
            .acquire_timeout(settings.acquire_timeout())
            .idle_timeout(settings.idle_timeout())
            .connect_lazy_with(options);

        Self {
            pool,
            acquire_timeout: settings.acquire_timeout(),
        }
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool, acquire_timeout: Duration) -> Self {
        Self {
            pool,
            acquire_timeout,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn map_pool_error(&self, err: sqlx::Error) -> DbError {
        match err {
            sqlx::Error::PoolTimedOut => DbError::timeout(
                "connection pool acquire",
                self.acquire_timeout.as_millis() as u64,
            ),
            other => DbError::from(other),
        }
    }
}

/// Run one statement and collect its rows and command-tag row count.
async fn run_statement<'c, E>(
    executor: E,
    sql: &str,
    params: &[QueryParam],
) -> Result<QueryResult, sqlx::Error>
where
    E: sqlx::Executor<'c, Database = Postgres>,
{
    let mut stream = executor.fetch_many(bind_all(sql, params));
    let mut result = QueryResult::default();

    while let Some(item) = stream.try_next().await? {
        match item {
            Either::Left(done) => result.row_count += done.rows_affected(),
            Either::Right(row) => {
                if result.columns.is_empty() {
                    result.columns = row.get_column_metadata();
                }
                result.rows.push(row.to_json_map());
            }
        }
    }

    Ok(result)
}

impl ConnectionSource for PgSource {
    type Connection = PoolConnection<Postgres>;

    async fn acquire(&self) -> DbResult<PoolConnection<Postgres>> {
        self.pool
            .acquire()
            .await
            .map_err(|e| self.map_pool_error(e))
    }

    async fn execute(&self, sql: &str, params: &[QueryParam]) -> DbResult<QueryResult> {
        run_statement(&self.pool, sql, params)
            .await
            .map_err(|e| self.map_pool_error(e))
    }

    async fn probe_idle(&self) -> DbResult<()> {
        // Only an already-open idle connection is checked; never dial out.
        let Some(mut conn) = self.pool.try_acquire() else {
            return Ok(());
        };
        if let Err(e) = conn.ping().await {
            conn.close_on_drop();
            return Err(DbError::from(e));
        }
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }

    fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    fn size(&self) -> u32 {
        self.pool.size()
    }

    fn num_idle(&self) -> usize {
        self.pool.num_idle()
    }

    fn max_connections(&self) -> u32 {
        self.pool.options().get_max_connections()
    }
}

impl LeasedConnection for PoolConnection<Postgres> {
    async fn execute(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<QueryResult> {
        Ok(run_statement(&mut **self, sql, params).await?)
    }

    fn discard(self) -> impl Future<Output = ()> + Send {
        // Detach now so a dropped future cannot hand the connection back.
        let conn = self.detach();
        async move {
            if let Err(e) = conn.close().await {
                warn!(error = %e, "Error closing discarded connection");
            }
        }
    }

    fn abandon(self) {
        // Dropping the raw connection closes its socket; the server aborts
        // any open transaction.
        drop(self.detach());
    }
}

/// Tunables for [`Database`] that sit above the connection source.
#[derive(Debug, Clone, Copy)]
pub struct DatabaseOptions {
    pub query_timeout: Option<Duration>,
    pub lease_idle_warning: Duration,
    pub close_timeout: Duration,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            query_timeout: None,
            lease_idle_warning: Duration::from_millis(
                crate::config::DEFAULT_LEASE_IDLE_WARNING_MS,
            ),
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }
}

impl From<&DatabaseSettings> for DatabaseOptions {
    fn from(settings: &DatabaseSettings) -> Self {
        Self {
            query_timeout: settings.query_timeout(),
            lease_idle_warning: settings.lease_idle_warning(),
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }
}

/// Point-in-time view of the pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    pub size: u32,
    pub idle: usize,
    pub max_connections: u32,
    pub active_leases: u64,
    pub total_leases: u64,
    pub watchdog_trips: u64,
    pub closed: bool,
}

struct DatabaseInner<S> {
    source: S,
    executor: QueryExecutor,
    options: DatabaseOptions,
    counters: Arc<LeaseCounters>,
    closed: AtomicBool,
}

/// Shared pool handle.
pub struct Database<S: ConnectionSource = PgSource> {
    inner: Arc<DatabaseInner<S>>,
}

impl<S: ConnectionSource> Clone for Database<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: ConnectionSource> std::fmt::Debug for Database<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("status", &self.status())
            .field("options", &self.inner.options)
            .finish_non_exhaustive()
    }
}

impl Database<PgSource> {
    /// Configure the PostgreSQL pool from settings. No connection is opened.
    pub fn connect_lazy(settings: &DatabaseSettings) -> DbResult<Self> {
        settings.validate().map_err(DbError::invalid_input)?;

        info!(
            host = %settings.db_host,
            port = settings.db_port,
            database = %settings.db_database,
            user = %settings.db_user,
            max_connections = settings.db_max_clients,
            acquire_timeout_ms = settings.db_connection_timeout,
            idle_timeout_ms = settings.db_idle_timeout,
            "Database pool configured"
        );

        Ok(Self::with_source(
            PgSource::connect_lazy(settings),
            DatabaseOptions::from(settings),
        ))
    }

    pub fn pg_pool(&self) -> &PgPool {
        self.inner.source.pool()
    }
}

impl<S: ConnectionSource> Database<S> {
    pub fn with_source(source: S, options: DatabaseOptions) -> Self {
        Self {
            inner: Arc::new(DatabaseInner {
                source,
                executor: QueryExecutor::new(options.query_timeout),
                options,
                counters: Arc::new(LeaseCounters::default()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn source(&self) -> &S {
        &self.inner.source
    }

    pub fn options(&self) -> &DatabaseOptions {
        &self.inner.options
    }

    pub fn counters(&self) -> &LeaseCounters {
        &self.inner.counters
    }

    /// Run a single statement on any free connection.
    pub async fn execute(&self, sql: &str, params: &[QueryParam]) -> DbResult<QueryResult> {
        self.inner
            .executor
            .execute(&self.inner.source, sql, params)
            .await
    }

    /// Check out a connection and open a transaction on it.
    ///
    /// The returned lease must be handed back with [`Lease::release`].
    pub async fn acquire(&self) -> DbResult<Lease<S::Connection>> {
        let conn = self.inner.source.acquire().await.inspect_err(|e| {
            error!(error = %e, "Failed to acquire connection from pool");
        })?;
        Lease::begin(
            conn,
            self.inner.options.lease_idle_warning,
            self.inner.options.query_timeout,
            Arc::clone(&self.inner.counters),
        )
        .await
    }

    /// Check one idle connection. See [`ConnectionSource::probe_idle`].
    pub async fn probe_idle(&self) -> DbResult<()> {
        self.inner.source.probe_idle().await
    }

    /// Close every connection, waiting at most the configured close timeout.
    ///
    /// Failures are logged, never returned. Only the first call does any work.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            debug!("Database pool already closed");
            return;
        }

        let limit = self.inner.options.close_timeout;
        match tokio::time::timeout(limit, self.inner.source.close()).await {
            Ok(()) => info!("Database pool closed"),
            Err(_) => error!(
                timeout_ms = limit.as_millis() as u64,
                active_leases = self.inner.counters.active(),
                "Error closing database pool: connections still checked out"
            ),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst) || self.inner.source.is_closed()
    }

    pub fn status(&self) -> PoolStatus {
        let source = &self.inner.source;
        PoolStatus {
            size: source.size(),
            idle: source.num_idle(),
            max_connections: source.max_connections(),
            active_leases: self.inner.counters.active(),
            total_leases: self.inner.counters.acquired(),
            watchdog_trips: self.inner.counters.watchdog_trips(),
            closed: self.is_closed(),
        }
    }
}
