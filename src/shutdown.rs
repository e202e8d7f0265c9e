//! Graceful shutdown coordination.
//!
//! A [`ShutdownCoordinator`] is flipped by Ctrl+C and polled by the harvest
//! loop between pages and during every rate-governor sleep. In-flight
//! requests and block writes always run to completion; the loop stops at
//! the next step boundary and, when resume is enabled, saves a checkpoint.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::warn;

/// Shared handle to a shutdown coordinator.
pub type SharedShutdown = Arc<ShutdownCoordinator>;

/// Spawn a task that requests shutdown on the first Ctrl+C.
pub fn install_ctrl_c_handler(shutdown: SharedShutdown) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl+C received - finishing current step and saving progress...");
            shutdown.request_shutdown();
        }
    });
}

/// Shutdown flag with async notification.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    is_shutdown: AtomicBool,
    notify: Notify,
}

impl ShutdownCoordinator {
    /// Create a new coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new coordinator wrapped in [`Arc`].
    pub fn shared() -> SharedShutdown {
        Arc::new(Self::new())
    }

    /// Request shutdown. Waiters are woken once.
    pub fn request_shutdown(&self) {
        if !self.is_shutdown.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    /// Whether shutdown has been requested.
    pub fn is_shutdown_requested(&self) -> bool {
        self.is_shutdown.load(Ordering::SeqCst)
    }

    /// Resolve once shutdown is requested. Returns immediately if already set.
    pub async fn wait_for_shutdown(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_shutdown_requested() {
            return;
        }
        notified.await;
    }
}
