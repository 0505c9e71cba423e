//! Background maintenance task.
//!
//! Runs one maintenance pass every `maintenance_interval` until the pool
//! shuts down or is dropped. The task only holds a weak reference, so it
//! never keeps an abandoned pool alive.

use std::sync::Weak;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::driver::ConnectionFactory;
use crate::pool::PoolInner;

pub(crate) fn spawn<F: ConnectionFactory>(
    runtime: &Handle,
    pool: Weak<PoolInner<F>>,
    cancel: CancellationToken,
    interval: Duration,
) {
    runtime.spawn(async move {
        loop {
            tokio::select! {
                () = tokio::time::sleep(interval) => {}
                () = cancel.cancelled() => break,
            }

            let Some(inner) = pool.upgrade() else {
                break;
            };
            inner.maintain().await;
        }
        debug!("pool maintenance stopped");
    });
}
