//! Shutdown Coordination
//!
//! The gateway runs until SIGINT/SIGTERM (or Ctrl-C); the first signal asks
//! the consumers to stop, a second one exits immediately.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Exit code used when a second signal forces an immediate exit
pub const FORCED_EXIT_CODE: i32 = 130;

/// Coordinates graceful shutdown across the gateway
#[derive(Clone)]
pub struct ShutdownCoordinator {
    shutdown_tx: broadcast::Sender<()>,
    shutdown_requested: Arc<AtomicBool>,
}

impl ShutdownCoordinator {
    pub fn new() -> (Self, broadcast::Receiver<()>) {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(8);
        let coordinator = Self {
            shutdown_tx,
            shutdown_requested: Arc::new(AtomicBool::new(false)),
        };
        (coordinator, shutdown_rx)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    pub fn trigger_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::Release);
        let _ = self.shutdown_tx.send(());
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::Acquire)
    }

    /// Wait until shutdown is triggered
    ///
    /// Returns immediately when shutdown was already requested.
    pub async fn wait(&self) {
        let mut rx = self.subscribe();
        if self.is_shutdown_requested() {
            return;
        }
        // Closed or lagged both mean a trigger happened
        let _ = rx.recv().await;
    }

    /// Trigger shutdown on the first termination signal
    ///
    /// Must be called from within a tokio runtime.
    pub fn install_signal_handlers(&self) {
        let signal_count = Arc::new(AtomicUsize::new(0));

        #[cfg(unix)]
        {
            // Restore default SIGPIPE so writes to a closed stdout terminate quietly
            unsafe {
                libc::signal(libc::SIGPIPE, libc::SIG_DFL);
            }

            use tokio::signal::unix::{signal, SignalKind};
            for kind in [SignalKind::interrupt(), SignalKind::terminate()] {
                let coordinator = self.clone();
                let counter = signal_count.clone();
                tokio::spawn(async move {
                    if let Ok(mut sig) = signal(kind) {
                        while sig.recv().await.is_some() {
                            coordinator.on_signal(&counter);
                        }
                    }
                });
            }
        }

        #[cfg(not(unix))]
        {
            let coordinator = self.clone();
            tokio::spawn(async move {
                while tokio::signal::ctrl_c().await.is_ok() {
                    coordinator.on_signal(&signal_count);
                }
            });
        }
    }

    fn on_signal(&self, counter: &AtomicUsize) {
        let previous = counter.fetch_add(1, Ordering::AcqRel);
        if previous >= 1 {
            log::warn!("Second termination signal received; exiting");
            std::process::exit(FORCED_EXIT_CODE);
        }
        log::info!("Termination signal received, shutting down");
        self.trigger_shutdown();
    }
}
