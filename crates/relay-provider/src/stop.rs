// SPDX-License-Identifier: MIT OR Apache-2.0
//! Cooperative stop signal shared between a stream source and its consumers.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// A cloneable stop signal.
///
/// All clones share the same state; stopping one makes every clone observe
/// `is_stopped() == true`.
#[derive(Clone)]
pub struct StopHandle {
    inner: Arc<StopInner>,
}

struct StopInner {
    stopped: AtomicBool,
    notify: Notify,
}

impl StopHandle {
    /// Create a handle that is not yet stopped.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StopInner {
                stopped: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Request a stop. Idempotent.
    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Returns `true` once [`stop`](Self::stop) has been called.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Completes when a stop has been requested.
    pub async fn stopped(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_stopped() {
                return;
            }
            notified.await;
        }
    }
}

impl Default for StopHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StopHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StopHandle")
            .field("stopped", &self.is_stopped())
            .finish()
    }
}
