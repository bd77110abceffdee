//! Connection source abstraction.
//!
//! The executor and the lease never talk to sqlx directly. They are written
//! against these two traits: a [`ConnectionSource`] hands out
//! [`LeasedConnection`]s and can run one-off statements itself. PostgreSQL
//! implements them in [`crate::db::pool`]; unit tests use an in-memory
//! source.

use crate::error::DbResult;
use crate::models::{QueryParam, QueryResult};
use std::future::Future;

/// A pool of connections.
pub trait ConnectionSource: Send + Sync + 'static {
    type Connection: LeasedConnection;

    /// Check out one connection for exclusive use.
    ///
    /// Suspends until a connection is free; fails with a timeout error once
    /// the acquisition timeout elapses.
    fn acquire(&self) -> impl Future<Output = DbResult<Self::Connection>> + Send;

    /// Run a single statement on whichever connection is free.
    fn execute(
        &self,
        sql: &str,
        params: &[QueryParam],
    ) -> impl Future<Output = DbResult<QueryResult>> + Send;

    /// Check the health of one idle connection, if there is one.
    ///
    /// An error means a connection nobody owns has failed.
    fn probe_idle(&self) -> impl Future<Output = DbResult<()>> + Send;

    /// Close every connection. Waits for checked-out connections to return.
    fn close(&self) -> impl Future<Output = ()> + Send;

    fn is_closed(&self) -> bool;

    /// Open connections, idle or in use.
    fn size(&self) -> u32;

    fn num_idle(&self) -> usize;

    fn max_connections(&self) -> u32;
}

/// One connection checked out of a [`ConnectionSource`].
///
/// Dropping the value returns the connection to its pool.
pub trait LeasedConnection: Send + Sized + 'static {
    fn execute(
        &mut self,
        sql: &str,
        params: &[QueryParam],
    ) -> impl Future<Output = DbResult<QueryResult>> + Send;

    /// Close the connection instead of returning it to the pool.
    fn discard(self) -> impl Future<Output = ()> + Send;

    /// Drop the connection without returning it to the pool.
    ///
    /// Runs outside any async runtime, so it must not spawn or block.
    fn abandon(self);
}
