//! Cooperative shutdown flag with an async wake-up
//!
//! Loops check `is_shutdown_requested()` between units of work and sleep
//! through `sleep_or_shutdown()` so a stop request cuts the idle wait short
//! without interrupting in-flight work.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

pub struct ShutdownSignal {
    shutdown: AtomicBool,
    wake: Notify,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self {
            shutdown: AtomicBool::new(false),
            wake: Notify::new(),
        }
    }

    /// Request shutdown
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.wake.notify_waiters();
        self.wake.notify_one();
    }

    /// Check if shutdown was requested
    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Clear a previous request so the owner can be started again
    pub fn reset(&self) {
        self.shutdown.store(false, Ordering::SeqCst);
    }

    /// Sleep for `period`, returning early if shutdown is requested
    pub async fn sleep_or_shutdown(&self, period: Duration) {
        if self.is_shutdown_requested() {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(period) => {}
            _ = self.wake.notified() => {}
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}
