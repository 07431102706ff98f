//! Service integration: stop requests and systemd notifications

use crate::error::{DiscoveryError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{debug, info, warn};

/// Cooperative stop flag shared by the log monitors
///
/// Set from the signal task; the monitors check it once per loop iteration,
/// so a registration already in flight always runs to completion.
#[derive(Clone, Debug, Default)]
pub struct ShutdownCoordinator {
    shutdown_requested: Arc<AtomicBool>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request graceful shutdown
    pub fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::Relaxed);
    }

    /// Check if shutdown was requested
    pub fn should_shutdown(&self) -> bool {
        self.shutdown_requested.load(Ordering::Relaxed)
    }

    /// Spawns a task that requests shutdown on SIGINT or SIGTERM.
    ///
    /// Must be called from within a tokio runtime.
    pub fn install_signal_handlers(&self) -> Result<()> {
        let mut sigterm = signal(SignalKind::terminate())
            .map_err(|e| DiscoveryError::Signal(format!("SIGTERM handler: {}", e)))?;
        let mut sigint = signal(SignalKind::interrupt())
            .map_err(|e| DiscoveryError::Signal(format!("SIGINT handler: {}", e)))?;

        let coordinator = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM"),
                _ = sigint.recv() => info!("Received SIGINT"),
            }
            coordinator.request_shutdown();
        });

        Ok(())
    }
}

/// Systemd notification for Type=notify units
///
/// A no-op unless `NOTIFY_SOCKET` is set, i.e. unless the daemon was started
/// by systemd in the foreground.
#[derive(Clone, Debug)]
pub struct SystemdNotifier {
    enabled: bool,
}

impl SystemdNotifier {
    pub fn new() -> Self {
        let enabled = std::env::var_os("NOTIFY_SOCKET").is_some();
        if enabled {
            debug!("Systemd notification socket detected");
        }
        Self { enabled }
    }

    /// Send READY notification to systemd
    pub fn notify_ready(&self) {
        self.notify(&[sd_notify::NotifyState::Ready]);
    }

    /// Send STOPPING notification to systemd
    pub fn notify_stopping(&self) {
        self.notify(&[sd_notify::NotifyState::Stopping]);
    }

    /// Send a free-form status line to systemd
    pub fn notify_status(&self, message: &str) {
        self.notify(&[sd_notify::NotifyState::Status(message)]);
    }

    /// Check if systemd is available
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn notify(&self, states: &[sd_notify::NotifyState<'_>]) {
        if !self.enabled {
            return;
        }
        if let Err(e) = sd_notify::notify(false, states) {
            warn!(error = %e, "Failed to notify systemd");
        }
    }
}

impl Default for SystemdNotifier {
    fn default() -> Self {
        Self::new()
    }
}
