//! Background task tracking for WebSocket connections.
//!
//! WebSocket handlers return to the HTTP server immediately after upgrade,
//! but the connection keeps running. Tasks spawned through the manager
//! receive the process-scoped shutdown channel instead of anything
//! request-scoped, and the manager can be drained with a deadline at
//! shutdown.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Notify};
use tokio::time::Instant;

/// Create the shutdown channel and its manager.
///
/// The sender side belongs to the server skeleton; sending `true` is the
/// on-shutdown hook that tells every tracked task to close its socket.
pub fn new_pair() -> (watch::Sender<bool>, WsManager) {
    let (tx, rx) = watch::channel(false);
    (tx, WsManager::new(rx))
}

#[derive(Clone)]
pub struct WsManager {
    inner: Arc<Inner>,
    base_rx: watch::Receiver<bool>,
}

struct Inner {
    active: AtomicUsize,
    drained: Notify,
}

/// Decrements the active count when the task future completes or panics.
struct TaskGuard {
    inner: Arc<Inner>,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        if self.inner.active.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.inner.drained.notify_waiters();
        }
    }
}

impl WsManager {
    pub fn new(base_rx: watch::Receiver<bool>) -> Self {
        WsManager {
            inner: Arc::new(Inner {
                active: AtomicUsize::new(0),
                drained: Notify::new(),
            }),
            base_rx,
        }
    }

    /// A fresh handle on the shutdown channel, for tasks that need one
    /// outside of [`WsManager::run`].
    pub fn base(&self) -> watch::Receiver<bool> {
        self.base_rx.clone()
    }

    /// Number of tracked tasks still running.
    pub fn active(&self) -> usize {
        self.inner.active.load(Ordering::Acquire)
    }

    /// Spawn a tracked task. The task receives the shutdown channel as its
    /// cancellation source and must exit promptly once it reads `true`.
    pub fn run<F, Fut>(&self, task: F)
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.inner.active.fetch_add(1, Ordering::AcqRel);
        let guard = TaskGuard {
            inner: self.inner.clone(),
        };
        let fut = task(self.base_rx.clone());
        tokio::spawn(async move {
            let _guard = guard;
            fut.await;
        });
    }

    /// Wait until every tracked task has exited, or `deadline` passes.
    pub async fn shutdown(&self, deadline: Instant) -> Result<(), DrainError> {
        loop {
            let notified = self.inner.drained.notified();
            let remaining = self.inner.active.load(Ordering::Acquire);
            if remaining == 0 {
                return Ok(());
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(DrainError {
                    remaining: self.inner.active.load(Ordering::Acquire),
                });
            }
        }
    }
}

/// The drain deadline passed with tasks still running.
#[derive(Debug)]
pub struct DrainError {
    pub remaining: usize,
}

impl std::fmt::Display for DrainError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "failed to wait for websockets to drain, {} task(s) still running",
            self.remaining
        )
    }
}

impl std::error::Error for DrainError {}
