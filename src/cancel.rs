//! Cancellation signal for outward-facing operations.
//!
//! Built on a `tokio::sync::watch` channel, the same way the engine's
//! shutdown signal works. [`CancelHandle::cancel`] flips the flag; every
//! [`CancelToken`] clone observes it. Dropping the handle without cancelling
//! never counts as a cancellation.

use std::future::Future;

use tokio::sync::watch;

use crate::error::ErrorKind;

/// Sender half. Keep it alive for as long as the operation may be cancelled.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Receiver half, passed into every orchestrator operation.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

/// Create a linked handle/token pair.
pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelToken { rx })
}

impl CancelToken {
    /// A token that is never cancelled.
    pub fn never() -> Self {
        let (_, token) = cancel_pair();
        token
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested. Pends forever if the handle
    /// is dropped without cancelling.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    /// Run `work` unless cancellation wins the race. On cancellation the
    /// work future is dropped, which aborts whatever HTTP calls it had in
    /// flight, and any partial result it was building is discarded.
    pub async fn run<T, F>(&self, work: F) -> Result<T, ErrorKind>
    where
        F: Future<Output = Result<T, ErrorKind>>,
    {
        if self.is_cancelled() {
            return Err(ErrorKind::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(ErrorKind::Cancelled),
            result = work => result,
        }
    }
}
