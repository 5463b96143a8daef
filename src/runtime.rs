//! Thin indirection over the async runtime, kept in one place so the rest of the crate
//! never names `tokio` directly. Mirrors the purpose (not the TLS/DNS breadth) of the
//! teacher driver's `runtime` module.

use std::{future::Future, time::Duration};

use tokio::task::JoinHandle;

use crate::error::{Error, Result};

/// Spawn a task in the background. Must be called from within a running runtime.
pub(crate) fn spawn<F>(fut: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::spawn(fut)
}

/// Sleep for the given duration without blocking the runtime.
pub(crate) async fn delay_for(duration: Duration) {
    tokio::time::sleep(duration).await;
}

/// Await `future` for at most `duration`, translating an elapsed deadline into a
/// [`crate::error::ErrorKind::Timeout`].
pub(crate) async fn timeout<F: Future>(duration: Duration, what: &str, future: F) -> Result<F::Output> {
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| Error::timeout(what))
}
