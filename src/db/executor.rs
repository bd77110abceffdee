//! Query execution engine.
//!
//! Every statement the HTTP layer runs against the pool goes through
//! [`QueryExecutor::execute`], which times it and leaves one log line per
//! statement: INFO on success, ERROR on failure. Errors are returned to the
//! caller unchanged.

use crate::db::backend::ConnectionSource;
use crate::error::{DbError, DbResult};
use crate::models::{QueryParam, QueryResult};
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{error, info};

/// Query executor that handles database query execution.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryExecutor {
    statement_timeout: Option<Duration>,
}

impl QueryExecutor {
    /// Create an executor. `None` lets statements run as long as the server allows.
    pub fn new(statement_timeout: Option<Duration>) -> Self {
        Self { statement_timeout }
    }

    pub fn statement_timeout(&self) -> Option<Duration> {
        self.statement_timeout
    }

    /// Run `sql` with positional `params` on any free connection of `source`.
    pub async fn execute<S: ConnectionSource>(
        &self,
        source: &S,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<QueryResult> {
        let start = Instant::now();

        let outcome = match self.statement_timeout {
            Some(limit) => match timeout(limit, source.execute(sql, params)).await {
                Ok(result) => result,
                Err(_) => Err(DbError::timeout(
                    "query execution",
                    limit.as_millis() as u64,
                )),
            },
            None => source.execute(sql, params).await,
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        match &outcome {
            Ok(result) => info!(
                query = %sql,
                duration_ms,
                rows = result.row_count,
                "Query executed"
            ),
            Err(e) => error!(query = %sql, duration_ms, error = %e, "Query failed"),
        }
        outcome
    }
}
