//! Stacki Node Discovery Daemon
//!
//! Watches dhcpd's DHCPDISCOVER messages in syslog and registers every
//! previously unseen MAC as a new cluster node: a free address is picked on
//! the PXE subnet of the receiving interface, then the node is added through
//! the `stack` command line and the generated configuration is synced.
//! Kickstart profile requests in the web server access log are logged.

pub mod allocator;
pub mod config;
pub mod daemon;
pub mod error;
pub mod logging;
pub mod monitor;
pub mod registrar;
pub mod service;
pub mod settings;
pub mod storage;
pub mod types;

pub use allocator::{AddressAllocator, HostAddresses, InterfaceProbe, IpCommandProbe};
pub use config::{read_mysql_password, DiscoveryConfig, DEFAULT_CONFIG_PATH};
pub use daemon::{Daemon, DaemonState, MonitoredLogs, PidFile};
pub use error::*;
pub use logging::init_logging;
pub use monitor::{
    classify_dhcp_line, is_kickstart_request, monitor_log, DhcpEvent, DhcpHandler,
    DiscoverOutcome, KickstartHandler, LineHandler, LogTail,
};
pub use registrar::{NodeIdentity, Registrar, RegistrationOutcome};
pub use service::{ShutdownCoordinator, SystemdNotifier};
pub use settings::{resolve_settings, DiscoverySettings, StartOptions};
pub use storage::{ClusterStore, MysqlStore};
#[cfg(any(test, feature = "test-util"))]
pub use storage::MemoryStore;
pub use types::{Appliance, MacAddress, SubnetRecord};
