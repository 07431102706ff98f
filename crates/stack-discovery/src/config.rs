//! Configuration file support for stack-discovery
//!
//! Loads daemon configuration from TOML. Default location:
//! /opt/stack/etc/discovery.toml. Every key is optional.

use crate::error::{DiscoveryError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "/opt/stack/etc/discovery.toml";

/// Process-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// PID file used for single-instance enforcement
    #[serde(default = "default_pid_file")]
    pub pid_file: PathBuf,

    /// Daemon log file
    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,

    /// Rotated log files kept alongside the active one
    #[serde(default = "default_max_log_files")]
    pub max_log_files: usize,

    /// Delay between reads when a monitored log has no new line
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Root of the proc filesystem, used for liveness checks
    #[serde(default = "default_proc_root")]
    pub proc_root: PathBuf,
}

/// Monitored log sources
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogsConfig {
    /// Syslog file carrying dhcpd messages
    #[serde(default = "default_dhcp_log")]
    pub dhcp_log: PathBuf,

    /// Web server access logs; the first one that exists is tailed
    #[serde(default = "default_kickstart_logs")]
    pub kickstart_logs: Vec<PathBuf>,
}

/// Cluster database connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_name")]
    pub name: String,

    #[serde(default = "default_db_host")]
    pub host: String,

    #[serde(default = "default_db_user")]
    pub user: String,

    /// Unix socket of the cluster MySQL instance
    #[serde(default = "default_db_socket")]
    pub socket: PathBuf,

    /// Client config file holding the password
    #[serde(default = "default_my_cnf")]
    pub my_cnf: PathBuf,
}

/// External binaries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandsConfig {
    #[serde(default = "default_stack_cmd")]
    pub stack: String,

    #[serde(default = "default_ip_cmd")]
    pub ip: String,
}

/// Fallbacks for start parameters that are normally read from attributes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Appliance used when none is given on the command line
    #[serde(default = "default_appliance")]
    pub appliance: String,

    /// Used when `discovery.base.rack` is not set
    #[serde(default)]
    pub rack: u32,

    /// Used when `discovery.base.rank` is not set and no node exists yet
    #[serde(default)]
    pub rank: u32,
}

/// Complete stack-discovery configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default)]
    pub daemon: DaemonConfig,

    #[serde(default)]
    pub logs: LogsConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub commands: CommandsConfig,

    #[serde(default)]
    pub defaults: DefaultsConfig,
}

fn default_pid_file() -> PathBuf {
    PathBuf::from("/var/run/stack-discovery.pid")
}

fn default_log_file() -> PathBuf {
    PathBuf::from("/var/log/stack-discovery.log")
}

fn default_max_log_files() -> usize {
    3
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_proc_root() -> PathBuf {
    PathBuf::from("/proc")
}

fn default_dhcp_log() -> PathBuf {
    PathBuf::from("/var/log/messages")
}

fn default_kickstart_logs() -> Vec<PathBuf> {
    vec![
        PathBuf::from("/var/log/httpd/ssl_access_log"),
        PathBuf::from("/var/log/apache2/ssl_access_log"),
    ]
}

fn default_db_name() -> String {
    "cluster".to_string()
}

fn default_db_host() -> String {
    "localhost".to_string()
}

fn default_db_user() -> String {
    "apache".to_string()
}

fn default_db_socket() -> PathBuf {
    PathBuf::from("/var/opt/stack/mysql/mysql.sock")
}

fn default_my_cnf() -> PathBuf {
    PathBuf::from("/opt/stack/etc/my.cnf")
}

fn default_stack_cmd() -> String {
    stack_common::shell::STACK_CMD.to_string()
}

fn default_ip_cmd() -> String {
    stack_common::shell::IP_CMD.to_string()
}

fn default_appliance() -> String {
    "backend".to_string()
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            pid_file: default_pid_file(),
            log_file: default_log_file(),
            max_log_files: default_max_log_files(),
            poll_interval_ms: default_poll_interval(),
            proc_root: default_proc_root(),
        }
    }
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            dhcp_log: default_dhcp_log(),
            kickstart_logs: default_kickstart_logs(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            name: default_db_name(),
            host: default_db_host(),
            user: default_db_user(),
            socket: default_db_socket(),
            my_cnf: default_my_cnf(),
        }
    }
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            stack: default_stack_cmd(),
            ip: default_ip_cmd(),
        }
    }
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            appliance: default_appliance(),
            rack: 0,
            rank: 0,
        }
    }
}

impl DiscoveryConfig {
    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => {
                let config: Self = toml::from_str(&content).map_err(|e| {
                    DiscoveryError::invalid_config(
                        path.display().to_string(),
                        format!("failed to parse config file: {}", e),
                    )
                })?;
                config.validate()?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(DiscoveryError::Io(e)),
        }
    }

    /// Delay between polls of an idle log
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.daemon.poll_interval_ms)
    }

    /// Returns the first configured kickstart log that exists.
    pub fn kickstart_log(&self) -> Result<PathBuf> {
        self.logs
            .kickstart_logs
            .iter()
            .find(|p| p.is_file())
            .cloned()
            .ok_or_else(|| DiscoveryError::invalid_config("kickstart_logs", "Apache log does not exist"))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.daemon.poll_interval_ms == 0 {
            return Err(DiscoveryError::invalid_config(
                "poll_interval_ms",
                "must be > 0",
            ));
        }

        if self.daemon.pid_file.as_os_str().is_empty() {
            return Err(DiscoveryError::invalid_config("pid_file", "must not be empty"));
        }

        if self.logs.kickstart_logs.is_empty() {
            return Err(DiscoveryError::invalid_config(
                "kickstart_logs",
                "at least one path is required",
            ));
        }

        if self.database.name.is_empty() || self.database.user.is_empty() {
            return Err(DiscoveryError::invalid_config(
                "database",
                "name and user must not be empty",
            ));
        }

        if self.commands.stack.is_empty() || self.commands.ip.is_empty() {
            return Err(DiscoveryError::invalid_config(
                "commands",
                "command paths must not be empty",
            ));
        }

        Ok(())
    }
}

/// Reads the MySQL password from a `my.cnf` style file.
///
/// The first line starting with `password` wins; the value is whatever
/// follows the first `=`, trimmed.
pub fn read_mysql_password(path: impl AsRef<Path>) -> Result<Option<String>> {
    let content = fs::read_to_string(path)?;
    Ok(parse_mysql_password(&content))
}

fn parse_mysql_password(content: &str) -> Option<String> {
    content
        .lines()
        .find(|line| line.starts_with("password"))
        .and_then(|line| line.split('=').nth(1))
        .map(|value| value.trim().to_string())
}
