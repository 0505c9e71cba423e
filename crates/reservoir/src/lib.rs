//! # Reservoir
//!
//! Async client-side connection pooling for tokio.
//!
//! A [`Pool`] hands physical connections produced by a
//! [`ConnectionFactory`] to concurrent callers as [`PooledConnection`]
//! proxies. Returned connections go directly to the oldest waiting caller
//! when there is one. Proxies reject every call after close, and closing a
//! connection also closes the statements and cursors derived from it.
//!
//! The pool never speaks a wire protocol; drivers plug in through the
//! traits in [`driver`].

pub mod config;
pub mod driver;
pub mod error;
pub mod events;
mod maintenance;
pub mod pool;
mod pooled;
pub mod proxy;
pub mod transfer;

pub use config::{PoolConfig, QueueStrategy, ValidationBudget};
pub use driver::{Connection, ConnectionFactory, Cursor, Statement};
pub use error::{BoxError, Error, ProxyKind, Result};
pub use events::{DestroyReason, EventBus, PoolEvent};
pub use pool::{Pool, PoolStats};
pub use proxy::{PooledConnection, PooledCursor, PooledStatement};
pub use transfer::{PollError, Ticket, TransferChannel};
