//! Explicit shutdown registry (spec.md §4.9's signal-handling note,
//! generalized as an owned registry rather than a process-wide
//! singleton — see this crate's design notes on why a global was
//! rejected).

use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::database::Database;

/// Tracks databases that should be closed on process shutdown.
///
/// Unlike a global signal handler installed once per process, this is
/// an owned object: a host application constructs one, registers its
/// databases, and decides for itself whether/when to call
/// [`ShutdownRegistry::install_signal_handlers`]. Nothing here runs
/// implicitly at crate load time.
#[derive(Default)]
pub struct ShutdownRegistry {
    databases: Mutex<Vec<Arc<Database>>>,
}

impl ShutdownRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        ShutdownRegistry::default()
    }

    /// Register `database` to be closed by [`ShutdownRegistry::shutdown`].
    pub async fn register(&self, database: Arc<Database>) {
        self.databases.lock().await.push(database);
    }

    /// Close every registered database, in registration order.
    pub async fn shutdown(&self) {
        let databases = self.databases.lock().await;
        for db in databases.iter() {
            if let Err(e) = db.close().await {
                tracing::warn!(error = %e, "error closing database during shutdown");
            }
        }
        info!(count = databases.len(), "shutdown registry closed all registered databases");
    }

    /// Spawn a task that waits for SIGINT/SIGTERM (or, on non-Unix
    /// platforms, Ctrl-C) and runs [`ShutdownRegistry::shutdown`] once,
    /// then returns. The caller decides whether to exit the process
    /// afterward; this registry never calls `std::process::exit`
    /// itself.
    pub fn install_signal_handlers(self: Arc<Self>) {
        tokio::spawn(async move {
            wait_for_shutdown_signal().await;
            self.shutdown().await;
        });
    }
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = sigint.recv() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
