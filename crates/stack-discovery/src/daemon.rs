//! Daemon lifecycle: pid file, liveness, stop, background start and the
//! monitoring loop

use crate::allocator::InterfaceProbe;
use crate::config::DaemonConfig;
use crate::error::{DiscoveryError, Result};
use crate::monitor::{monitor_log, DhcpHandler, KickstartHandler};
use crate::service::{ShutdownCoordinator, SystemdNotifier};
use crate::storage::ClusterStore;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use stack_common::AdminCommands;
use std::ffi::OsString;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Flag appended when re-executing in the background
pub const FOREGROUND_FLAG: &str = "--foreground";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonState {
    NotRunning,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for DaemonState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DaemonState::NotRunning => "not running",
            DaemonState::Starting => "starting",
            DaemonState::Running => "running",
            DaemonState::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// Holds the pid file for the lifetime of the daemon
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Writes the current process id to `path`
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&path)?;
        writeln!(file, "{}", std::process::id())?;
        file.sync_all()?;

        debug!(path = %path.display(), "Wrote pid file");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// The two logs followed while running
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitoredLogs {
    pub dhcp_log: PathBuf,
    pub kickstart_log: PathBuf,
}

/// Controls one discovery daemon instance through its pid file
#[derive(Debug)]
pub struct Daemon {
    pid_file: PathBuf,
    proc_root: PathBuf,
    state: DaemonState,
}

impl Daemon {
    pub fn new(pid_file: impl Into<PathBuf>, proc_root: impl Into<PathBuf>) -> Self {
        Self {
            pid_file: pid_file.into(),
            proc_root: proc_root.into(),
            state: DaemonState::NotRunning,
        }
    }

    pub fn from_config(config: &DaemonConfig) -> Self {
        Self::new(&config.pid_file, &config.proc_root)
    }

    pub fn state(&self) -> DaemonState {
        self.state
    }

    pub fn pid_file(&self) -> &Path {
        &self.pid_file
    }

    fn transition(&mut self, next: DaemonState) {
        info!(from = %self.state, to = %next, "Daemon state change");
        self.state = next;
    }

    /// Pid recorded in the pid file, if the file exists and holds a number
    pub fn read_pid(&self) -> Option<i32> {
        let content = fs::read_to_string(&self.pid_file).ok()?;
        content.trim().parse().ok()
    }

    /// Whether the process named in the pid file is alive
    ///
    /// A pid file naming a process that no longer exists, or holding
    /// garbage, is removed.
    pub fn is_running(&self) -> bool {
        if !self.pid_file.exists() {
            return false;
        }

        if let Some(pid) = self.read_pid() {
            if self.proc_root.join(pid.to_string()).exists() {
                return true;
            }
            debug!(pid, "Process in pid file is gone");
        }

        info!(path = %self.pid_file.display(), "Removing stale pid file");
        if let Err(e) = fs::remove_file(&self.pid_file) {
            warn!(error = %e, "Failed to remove stale pid file");
        }
        false
    }

    /// Fails with [`DiscoveryError::AlreadyRunning`] if another instance is alive
    pub fn ensure_not_running(&self) -> Result<()> {
        if self.is_running() {
            return Err(DiscoveryError::AlreadyRunning(self.read_pid().unwrap_or_default()));
        }
        Ok(())
    }

    /// Sends SIGTERM to the running daemon
    ///
    /// Returns false only when the signal could not be delivered; a daemon
    /// that is not running counts as stopped.
    pub fn stop(&self) -> bool {
        let Some(pid) = self.read_pid().filter(|_| self.is_running()) else {
            info!("Discovery daemon is not running");
            return true;
        };

        match kill(Pid::from_raw(pid), Signal::SIGTERM) {
            Ok(()) => {
                info!(pid, "Sent SIGTERM to discovery daemon");
                true
            }
            Err(e) => {
                error!(pid, error = %e, "Failed to signal discovery daemon");
                false
            }
        }
    }

    /// Re-executes this binary with `args` plus `--foreground` in a new
    /// session, detached from the terminal. Returns the child's pid.
    pub fn spawn_background<I>(&self, args: I) -> Result<u32>
    where
        I: IntoIterator<Item = OsString>,
    {
        let exe = std::env::current_exe()?;
        let mut command = Command::new(&exe);
        command
            .args(args)
            .arg(FOREGROUND_FLAG)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        // SAFETY: setsid is async-signal-safe and touches no parent state
        unsafe {
            command.pre_exec(|| {
                nix::unistd::setsid()
                    .map(|_| ())
                    .map_err(std::io::Error::from)
            });
        }

        let child = command.spawn()?;
        info!(pid = child.id(), exe = %exe.display(), "Started discovery daemon in the background");
        Ok(child.id())
    }

    /// Runs both log monitors until a stop is requested or one of them fails
    ///
    /// The pid file exists for exactly the duration of this call and the
    /// store is closed on the way out, whatever the outcome.
    pub async fn run<S, A, P>(
        &mut self,
        store: Arc<S>,
        mut dhcp: DhcpHandler<S, A, P>,
        logs: &MonitoredLogs,
        shutdown: &ShutdownCoordinator,
        poll: Duration,
    ) -> Result<()>
    where
        S: ClusterStore + ?Sized,
        A: AdminCommands,
        P: InterfaceProbe,
    {
        self.ensure_not_running()?;
        self.transition(DaemonState::Starting);

        let result = self.monitor(&mut dhcp, logs, shutdown, poll).await;
        if let Err(e) = &result {
            error!(error = %e, "event loop threw an exception");
        }

        self.transition(DaemonState::Stopping);
        store.close().await;
        self.transition(DaemonState::NotRunning);
        result
    }

    async fn monitor<S, A, P>(
        &mut self,
        dhcp: &mut DhcpHandler<S, A, P>,
        logs: &MonitoredLogs,
        shutdown: &ShutdownCoordinator,
        poll: Duration,
    ) -> Result<()>
    where
        S: ClusterStore + ?Sized,
        A: AdminCommands,
        P: InterfaceProbe,
    {
        // Handlers first: the pid file must never name a process that a
        // SIGTERM would kill outright
        shutdown.install_signal_handlers()?;
        let _pid_file = PidFile::create(&self.pid_file)?;

        let notifier = SystemdNotifier::new();
        let mut kickstart = KickstartHandler::new();

        self.transition(DaemonState::Running);
        notifier.notify_ready();
        notifier.notify_status(&format!("Next host {}", dhcp.identity().hostname()));

        let outcome = tokio::try_join!(
            monitor_log(&logs.dhcp_log, dhcp, shutdown, poll),
            monitor_log(&logs.kickstart_log, &mut kickstart, shutdown, poll),
        );

        notifier.notify_stopping();
        info!(
            kickstart_requests = kickstart.requests(),
            "Log monitors finished"
        );
        outcome.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn daemon(dir: &TempDir) -> Daemon {
        Daemon::new(dir.path().join("discovery.pid"), "/proc")
    }

    #[test]
    fn test_not_running_without_pid_file() {
        let dir = TempDir::new().unwrap();
        let daemon = daemon(&dir);
        assert_eq!(daemon.read_pid(), None);
        assert!(!daemon.is_running());
        assert_eq!(daemon.state(), DaemonState::NotRunning);
    }

    #[test]
    fn test_stale_pid_file_removed() {
        let dir = TempDir::new().unwrap();
        let daemon = daemon(&dir);
        fs::write(daemon.pid_file(), "999999999\n").unwrap();

        assert!(!daemon.is_running());
        assert!(!daemon.pid_file().exists());
    }

    #[test]
    fn test_garbage_pid_file_removed() {
        let dir = TempDir::new().unwrap();
        let daemon = daemon(&dir);
        fs::write(daemon.pid_file(), "not a pid").unwrap();

        assert!(!daemon.is_running());
        assert!(!daemon.pid_file().exists());
    }

    #[test]
    fn test_live_pid_reported_running() {
        let dir = TempDir::new().unwrap();
        let daemon = daemon(&dir);
        fs::write(daemon.pid_file(), std::process::id().to_string()).unwrap();

        assert!(daemon.is_running());
        assert!(daemon.pid_file().exists());
        assert!(matches!(
            daemon.ensure_not_running(),
            Err(DiscoveryError::AlreadyRunning(pid)) if pid == std::process::id() as i32
        ));
    }

    #[test]
    fn test_proc_root_is_configurable() {
        let dir = TempDir::new().unwrap();
        let proc_root = dir.path().join("proc");
        fs::create_dir_all(proc_root.join("4242")).unwrap();

        let daemon = Daemon::new(dir.path().join("d.pid"), &proc_root);
        fs::write(daemon.pid_file(), "4242").unwrap();
        assert!(daemon.is_running());
    }

    #[test]
    fn test_stop_when_not_running() {
        let dir = TempDir::new().unwrap();
        assert!(daemon(&dir).stop());
    }

    #[test]
    fn test_stop_undeliverable_signal() {
        let dir = TempDir::new().unwrap();
        let proc_root = dir.path().join("proc");
        fs::create_dir_all(proc_root.join("999999999")).unwrap();

        let daemon = Daemon::new(dir.path().join("d.pid"), &proc_root);
        fs::write(daemon.pid_file(), "999999999").unwrap();
        assert!(daemon.is_running());
        assert!(!daemon.stop());
    }

    #[test]
    fn test_stop_terminates_process() {
        use std::os::unix::process::ExitStatusExt;

        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        let dir = TempDir::new().unwrap();
        let daemon = daemon(&dir);
        fs::write(daemon.pid_file(), child.id().to_string()).unwrap();

        assert!(daemon.stop());
        let status = child.wait().unwrap();
        assert_eq!(status.signal(), Some(Signal::SIGTERM as i32));
    }

    #[test]
    fn test_pid_file_guard() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run").join("discovery.pid");
        {
            let guard = PidFile::create(&path).unwrap();
            let content = fs::read_to_string(guard.path()).unwrap();
            assert_eq!(content.trim(), std::process::id().to_string());
        }
        assert!(!path.exists());
    }
}
