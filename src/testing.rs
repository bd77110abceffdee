//! In-memory connection source and log capture for unit tests.

use crate::db::backend::{ConnectionSource, LeasedConnection};
use crate::error::{DbError, DbResult};
use crate::models::{QueryParam, QueryResult};
use serde_json::Value;
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing_subscriber::fmt::MakeWriter;

#[derive(Debug)]
struct FakeState {
    permits: Arc<Semaphore>,
    max: u32,
    acquire_timeout: Duration,
    statements: Mutex<Vec<String>>,
    failing: Mutex<Vec<String>>,
    results: Mutex<HashMap<String, QueryResult>>,
    delay: Mutex<Option<Duration>>,
    released: AtomicU64,
    discarded: AtomicU64,
    idle_fault: AtomicBool,
    closed: AtomicBool,
}

/// A connection source backed by a semaphore instead of sockets.
///
/// Every statement is recorded. Statements registered with
/// [`FakeSource::fail_on`] fail with a database error.
#[derive(Debug, Clone)]
pub(crate) struct FakeSource {
    state: Arc<FakeState>,
}

impl FakeSource {
    pub(crate) fn new(max: u32) -> Self {
        Self::with_acquire_timeout(max, Duration::from_millis(2_000))
    }

    pub(crate) fn with_acquire_timeout(max: u32, acquire_timeout: Duration) -> Self {
        Self {
            state: Arc::new(FakeState {
                permits: Arc::new(Semaphore::new(max as usize)),
                max,
                acquire_timeout,
                statements: Mutex::new(Vec::new()),
                failing: Mutex::new(Vec::new()),
                results: Mutex::new(HashMap::new()),
                delay: Mutex::new(None),
                released: AtomicU64::new(0),
                discarded: AtomicU64::new(0),
                idle_fault: AtomicBool::new(false),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Make every statement equal to `sql` (case-insensitive) fail.
    pub(crate) fn fail_on(&self, sql: &str) {
        self.state
            .failing
            .lock()
            .unwrap()
            .push(sql.trim().to_ascii_uppercase());
    }

    /// Canned result for an exact statement.
    pub(crate) fn respond(&self, sql: &str, result: QueryResult) {
        self.state
            .results
            .lock()
            .unwrap()
            .insert(sql.to_string(), result);
    }

    /// Delay every statement by `delay`.
    pub(crate) fn slow(&self, delay: Duration) {
        *self.state.delay.lock().unwrap() = Some(delay);
    }

    pub(crate) fn break_idle(&self) {
        self.state.idle_fault.store(true, Ordering::SeqCst);
    }

    pub(crate) fn statements(&self) -> Vec<String> {
        self.state.statements.lock().unwrap().clone()
    }

    /// Connections returned to the pool.
    pub(crate) fn released(&self) -> u64 {
        self.state.released.load(Ordering::SeqCst)
    }

    /// Connections closed instead of returned.
    pub(crate) fn discarded(&self) -> u64 {
        self.state.discarded.load(Ordering::SeqCst)
    }

    pub(crate) fn available(&self) -> usize {
        self.state.permits.available_permits()
    }

    async fn run(state: &FakeState, sql: &str) -> DbResult<QueryResult> {
        state.statements.lock().unwrap().push(sql.to_string());
        let delay = *state.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let normalized = sql.trim().to_ascii_uppercase();
        if state.failing.lock().unwrap().contains(&normalized) {
            return Err(DbError::database(
                format!("simulated failure for {sql}"),
                Some("XX000".to_string()),
                "Test failure",
            ));
        }
        Ok(state
            .results
            .lock()
            .unwrap()
            .get(sql)
            .cloned()
            .unwrap_or_default())
    }
}

impl ConnectionSource for FakeSource {
    type Connection = FakeConnection;

    async fn acquire(&self) -> DbResult<FakeConnection> {
        if self.state.closed.load(Ordering::SeqCst) {
            return Err(DbError::connection("Connection pool is closed", "Test"));
        }
        let permit = tokio::time::timeout(
            self.state.acquire_timeout,
            self.state.permits.clone().acquire_owned(),
        )
        .await
        .map_err(|_| {
            DbError::timeout(
                "connection pool acquire",
                self.state.acquire_timeout.as_millis() as u64,
            )
        })?
        .map_err(|_| DbError::connection("Connection pool is closed", "Test"))?;
        Ok(FakeConnection {
            state: self.state.clone(),
            permit: Some(permit),
            discarded: false,
        })
    }

    async fn execute(&self, sql: &str, params: &[QueryParam]) -> DbResult<QueryResult> {
        let mut conn = self.acquire().await?;
        conn.execute(sql, params).await
    }

    async fn probe_idle(&self) -> DbResult<()> {
        if self.state.idle_fault.load(Ordering::SeqCst) {
            return Err(DbError::connection(
                "terminating connection due to administrator command",
                "Test",
            ));
        }
        Ok(())
    }

    async fn close(&self) {
        self.state.closed.store(true, Ordering::SeqCst);
        // Wait for every checked-out connection to come back.
        if let Ok(all) = self.state.permits.acquire_many(self.state.max).await {
            all.forget();
        }
        self.state.permits.close();
    }

    fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }

    fn size(&self) -> u32 {
        self.state.max - self.state.permits.available_permits() as u32
    }

    fn num_idle(&self) -> usize {
        0
    }

    fn max_connections(&self) -> u32 {
        self.state.max
    }
}

#[derive(Debug)]
pub(crate) struct FakeConnection {
    state: Arc<FakeState>,
    permit: Option<OwnedSemaphorePermit>,
    discarded: bool,
}

impl LeasedConnection for FakeConnection {
    async fn execute(&mut self, sql: &str, _params: &[QueryParam]) -> DbResult<QueryResult> {
        FakeSource::run(&self.state, sql).await
    }

    async fn discard(self) {
        self.abandon();
    }

    fn abandon(mut self) {
        self.discarded = true;
        self.state.discarded.fetch_add(1, Ordering::SeqCst);
    }
}

impl Drop for FakeConnection {
    fn drop(&mut self) {
        if !self.discarded {
            self.state.released.fetch_add(1, Ordering::SeqCst);
        }
        self.permit.take();
    }
}

/// Collects JSON log lines written by a thread-local subscriber.
#[derive(Debug, Clone, Default)]
pub(crate) struct LogCapture {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl LogCapture {
    /// Route events on the current thread into this capture until the guard drops.
    pub(crate) fn install(&self) -> tracing::subscriber::DefaultGuard {
        let subscriber = tracing_subscriber::fmt()
            .json()
            .with_max_level(tracing::Level::TRACE)
            .with_ansi(false)
            .with_writer(self.clone())
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub(crate) fn events(&self) -> Vec<Value> {
        let buf = self.buf.lock().unwrap();
        String::from_utf8_lossy(&buf)
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }

    /// Events whose message is exactly `message`.
    pub(crate) fn find(&self, message: &str) -> Vec<Value> {
        self.events()
            .into_iter()
            .filter(|event| event["fields"]["message"] == message)
            .collect()
    }
}

pub(crate) struct CaptureWriter {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl io::Write for CaptureWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.lock().unwrap().extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = CaptureWriter;

    fn make_writer(&'a self) -> Self::Writer {
        CaptureWriter {
            buf: self.buf.clone(),
        }
    }
}
