//! Physical connection capabilities consumed by the pool.
//!
//! The pool never speaks a wire protocol itself. A [`ConnectionFactory`]
//! opens, checks and closes physical connections; [`Connection`],
//! [`Statement`] and [`Cursor`] are the operations the proxies delegate to.
//! All errors are boxed and passed through to callers unchanged.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::BoxError;

/// Creates, validates and destroys physical connections.
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    /// The physical connection type produced by this factory.
    type Connection: Connection;

    /// Open a new physical connection.
    async fn create(&self) -> Result<Self::Connection, BoxError>;

    /// Check whether an existing connection is still usable.
    ///
    /// The pool additionally bounds the call by `timeout`, so a hung check
    /// counts as a failure.
    async fn validate(&self, _conn: &mut Self::Connection, _timeout: Duration) -> bool {
        true
    }

    /// Close a connection permanently. Failures are logged and ignored.
    async fn destroy(&self, conn: Self::Connection) -> Result<(), BoxError> {
        drop(conn);
        Ok(())
    }

    /// Whether `error` leaves the connection unusable.
    ///
    /// A borrowed connection that reports a fatal error is destroyed on
    /// return instead of being recycled.
    fn is_fatal(&self, _error: &BoxError) -> bool {
        false
    }
}

/// Operations available on a physical connection.
#[async_trait]
pub trait Connection: Send + 'static {
    /// Prepared statement type.
    type Statement: Statement;

    /// Execute a statement that returns no rows; returns the affected row count.
    async fn execute(&mut self, sql: &str) -> Result<u64, BoxError>;

    /// Prepare a statement for execution.
    async fn prepare(&mut self, sql: &str) -> Result<Self::Statement, BoxError>;

    /// Commit the current transaction.
    async fn commit(&mut self) -> Result<(), BoxError>;

    /// Roll back the current transaction.
    async fn rollback(&mut self) -> Result<(), BoxError>;

    /// Switch auto-commit mode.
    async fn set_auto_commit(&mut self, enabled: bool) -> Result<(), BoxError>;
}

/// Operations available on a prepared statement.
#[async_trait]
pub trait Statement: Send + 'static {
    /// Cursor type produced by [`query`](Statement::query).
    type Cursor: Cursor;

    /// Execute the statement; returns the affected row count.
    async fn execute(&mut self) -> Result<u64, BoxError>;

    /// Execute the statement and open a cursor over its rows.
    async fn query(&mut self) -> Result<Self::Cursor, BoxError>;

    /// Release server-side resources held by the statement.
    async fn close(&mut self) -> Result<(), BoxError> {
        Ok(())
    }
}

/// Forward-only iteration over a result set.
#[async_trait]
pub trait Cursor: Send + 'static {
    /// Row type yielded by the cursor.
    type Row: Send + 'static;

    /// Fetch the next row, or `None` when the result set is exhausted.
    async fn next(&mut self) -> Result<Option<Self::Row>, BoxError>;

    /// Release server-side resources held by the cursor.
    async fn close(&mut self) -> Result<(), BoxError> {
        Ok(())
    }
}

/// Statement type of a factory's connections.
pub type StatementOf<F> = <<F as ConnectionFactory>::Connection as Connection>::Statement;

/// Cursor type of a factory's statements.
pub type CursorOf<F> = <StatementOf<F> as Statement>::Cursor;

/// Row type of a factory's cursors.
pub type RowOf<F> = <CursorOf<F> as Cursor>::Row;
