//! Proxies that wrap borrowed connections and the objects derived from them.
//!
//! A proxy checks its closed state before every delegated call, so nothing
//! reaches the physical object after close. Closing a connection closes its
//! statements, and closing a statement closes its cursors.

pub mod connection;
pub mod cursor;
pub(crate) mod state;
pub mod statement;

pub use connection::PooledConnection;
pub use cursor::PooledCursor;
pub use statement::PooledStatement;
