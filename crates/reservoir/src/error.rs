//! Error types for pool and proxy operations
use std::fmt;

use thiserror::Error;

/// Boxed error produced by the physical driver.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result type for pool operations
pub type Result<T> = std::result::Result<T, Error>;

/// Which proxy an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProxyKind {
    /// A borrowed connection.
    Connection,
    /// A statement prepared on a borrowed connection.
    Statement,
    /// A cursor opened by a statement.
    Cursor,
}

impl fmt::Display for ProxyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Connection => "connection",
            Self::Statement => "statement",
            Self::Cursor => "cursor",
        })
    }
}

/// Error type for pool and proxy operations
#[derive(Error, Debug)]
pub enum Error {
    /// The pool was shut down before or while the call was made.
    #[error("Pool '{pool}' is closed")]
    PoolClosed {
        /// The pool name
        pool: String,
    },

    /// No connection became available within the wait budget.
    #[error("Pool '{pool}' timed out after {waited_ms}ms ({max_size} max, {waiters} waiting)")]
    BorrowTimeout {
        /// The pool name
        pool: String,
        /// How long the caller waited in milliseconds
        waited_ms: u64,
        /// Maximum pool size
        max_size: usize,
        /// Number of callers still waiting when this one gave up
        waiters: usize,
    },

    /// The connection factory failed to open a physical connection.
    #[error("Failed to create a connection for '{pool}': {source}")]
    Creation {
        /// The pool name
        pool: String,
        /// The factory error
        #[source]
        source: BoxError,
    },

    /// The proxy was used after it was closed.
    #[error("The {kind} is already closed")]
    AlreadyClosed {
        /// Which proxy was used
        kind: ProxyKind,
    },

    /// The proxy was used after its owning connection or statement closed.
    #[error("The {kind} belongs to a closed parent")]
    ParentClosed {
        /// Which proxy was used
        kind: ProxyKind,
    },

    /// An operation on the physical connection failed.
    #[error(transparent)]
    Driver {
        /// The driver error, unchanged
        source: BoxError,
    },

    /// Pool configuration is invalid
    #[error("Configuration error: {message}")]
    Configuration {
        /// The error message
        message: String,
    },
}

impl Error {
    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub(crate) fn driver(source: BoxError) -> Self {
        Self::Driver { source }
    }

    /// Check if retrying the same call may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::BorrowTimeout { .. } | Self::Creation { .. })
    }

    /// Check if this error reports use of a closed proxy.
    #[must_use]
    pub fn is_closed_error(&self) -> bool {
        matches!(self, Self::AlreadyClosed { .. } | Self::ParentClosed { .. })
    }

    /// The underlying driver error, if this error came from the driver or
    /// the factory.
    #[must_use]
    pub fn driver_error(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        match self {
            Self::Driver { source } | Self::Creation { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}
