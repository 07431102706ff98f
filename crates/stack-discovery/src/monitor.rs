//! Log tailing and line classification
//!
//! Two logs are followed: syslog for dhcpd's DHCPDISCOVER messages, which
//! drive registration, and the web server access log for kickstart profile
//! requests, which are only logged. Both tails start at the current end of
//! file and run until a stop is requested.

use crate::allocator::{AddressAllocator, InterfaceProbe};
use crate::error::Result;
use crate::registrar::{NodeIdentity, Registrar, RegistrationOutcome};
use crate::service::ShutdownCoordinator;
use crate::storage::ClusterStore;
use crate::types::MacAddress;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use stack_common::AdminCommands;
use std::io::SeekFrom;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tracing::{debug, error, info, warn};

static DHCPDISCOVER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"DHCPDISCOVER from ([0-9a-f:]{17}) via (\S+)(:|$)").expect("Invalid regex pattern")
});

static KICKSTART_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"install/sbin(/public)?/profile\.cgi").expect("Invalid regex pattern"));

/// Follows a growing file from its end
pub struct LogTail {
    reader: BufReader<File>,
    pending: Vec<u8>,
}

impl LogTail {
    /// Opens `path` positioned at its current end
    pub async fn open(path: &Path) -> Result<Self> {
        let mut file = File::open(path).await?;
        file.seek(SeekFrom::End(0)).await?;
        Ok(Self {
            reader: BufReader::new(file),
            pending: Vec::new(),
        })
    }

    /// Next complete line without its terminator, or `None` if no full line
    /// has been written yet
    pub async fn next_line(&mut self) -> Result<Option<String>> {
        let read = self.reader.read_until(b'\n', &mut self.pending).await?;
        if read == 0 || self.pending.last() != Some(&b'\n') {
            return Ok(None);
        }

        let raw = std::mem::take(&mut self.pending);
        let line = String::from_utf8_lossy(&raw);
        Ok(Some(line.trim_end_matches(['\n', '\r']).to_string()))
    }
}

/// What a syslog line means to the daemon
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DhcpEvent {
    Discover { mac: MacAddress, interface: String },
    /// Mentions DHCPDISCOVER but does not have the expected shape
    Malformed,
    Other,
}

pub fn classify_dhcp_line(line: &str) -> DhcpEvent {
    let line = line.trim_end();
    match DHCPDISCOVER_RE.captures(line) {
        Some(caps) => match MacAddress::parse(&caps[1]) {
            Some(mac) => DhcpEvent::Discover {
                mac,
                interface: caps[2].to_string(),
            },
            None => DhcpEvent::Malformed,
        },
        None if line.contains("DHCPDISCOVER") => DhcpEvent::Malformed,
        None => DhcpEvent::Other,
    }
}

pub fn is_kickstart_request(line: &str) -> bool {
    KICKSTART_RE.is_match(line)
}

/// Consumer of log lines
#[async_trait]
pub trait LineHandler: Send {
    /// Handles one line. An error stops the monitor and, with it, the daemon.
    async fn handle_line(&mut self, line: &str) -> Result<()>;
}

/// What happened to a DHCPDISCOVER
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoverOutcome {
    /// MAC already has an interface record
    AlreadyKnown,
    /// No free address on the interface's subnet
    NoAddress,
    Attempted(RegistrationOutcome),
}

/// Registers nodes seen in DHCPDISCOVER lines
pub struct DhcpHandler<S: ?Sized, A, P> {
    store: Arc<S>,
    allocator: AddressAllocator<P>,
    registrar: Registrar<A>,
    identity: NodeIdentity,
}

impl<S, A, P> DhcpHandler<S, A, P>
where
    S: ClusterStore + ?Sized,
    A: AdminCommands,
    P: InterfaceProbe,
{
    pub fn new(
        store: Arc<S>,
        allocator: AddressAllocator<P>,
        registrar: Registrar<A>,
        identity: NodeIdentity,
    ) -> Self {
        Self {
            store,
            allocator,
            registrar,
            identity,
        }
    }

    /// Identity the next registered node will get
    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    /// Allocates an address for an unseen MAC and registers the node
    pub async fn handle_discover(
        &mut self,
        mac: &MacAddress,
        interface: &str,
    ) -> Result<DiscoverOutcome> {
        if self.store.mac_known(mac).await? {
            debug!(%mac, interface, "node is already known");
            return Ok(DiscoverOutcome::AlreadyKnown);
        }

        info!(%mac, interface, "found a new node");

        let Some(ip) = self
            .allocator
            .next_address(self.store.as_ref(), interface)
            .await?
        else {
            error!(interface, "no IP addresses available for interface");
            return Ok(DiscoverOutcome::NoAddress);
        };

        let outcome = self
            .registrar
            .register_host(
                &mut self.allocator,
                self.store.as_ref(),
                &self.identity,
                interface,
                mac,
                ip,
            )
            .await?;

        if outcome.is_registered() {
            self.identity.advance();
        }

        Ok(DiscoverOutcome::Attempted(outcome))
    }
}

#[async_trait]
impl<S, A, P> LineHandler for DhcpHandler<S, A, P>
where
    S: ClusterStore + ?Sized,
    A: AdminCommands,
    P: InterfaceProbe,
{
    async fn handle_line(&mut self, line: &str) -> Result<()> {
        match classify_dhcp_line(line) {
            DhcpEvent::Discover { mac, interface } => {
                info!(%mac, interface = %interface, "detected a dhcp request");
                self.handle_discover(&mac, &interface).await?;
            }
            DhcpEvent::Malformed => {
                warn!("DHCPDISCOVER found in line but didn't match regex:\n{}", line);
            }
            DhcpEvent::Other => {}
        }
        Ok(())
    }
}

/// Logs kickstart profile requests
#[derive(Debug, Default)]
pub struct KickstartHandler {
    requests: u64,
}

impl KickstartHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Profile requests seen so far
    pub fn requests(&self) -> u64 {
        self.requests
    }
}

#[async_trait]
impl LineHandler for KickstartHandler {
    async fn handle_line(&mut self, line: &str) -> Result<()> {
        if is_kickstart_request(line) {
            self.requests += 1;
            debug!("KICKSTART: {}", line);
        }
        Ok(())
    }
}

/// Tails `path` into `handler` until `shutdown` is requested
///
/// The flag is checked once per iteration; when no new line is available
/// the monitor sleeps for `poll`, yielding to the other monitor.
pub async fn monitor_log<H: LineHandler + ?Sized>(
    path: &Path,
    handler: &mut H,
    shutdown: &ShutdownCoordinator,
    poll: Duration,
) -> Result<()> {
    let mut tail = LogTail::open(path).await?;
    info!(path = %path.display(), "Monitoring log");

    while !shutdown.should_shutdown() {
        match tail.next_line().await? {
            Some(line) => handler.handle_line(&line).await?,
            None => tokio::time::sleep(poll).await,
        }
    }

    debug!(path = %path.display(), "Log monitor stopped");
    Ok(())
}
