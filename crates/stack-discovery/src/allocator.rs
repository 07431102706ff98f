//! Subnet resolution and IP address allocation
//!
//! Each PXE interface maps to exactly one IPv4 network, learned from the
//! live interface configuration and matched against the `subnets` table.
//! Addresses are handed out by walking that network's hosts in order. The
//! walk is per interface and never rewinds for the life of the daemon, so an
//! address is handed out at most once per run even if it is freed in the
//! database afterwards.

use crate::error::Result;
use crate::storage::ClusterStore;
use crate::types::SubnetRecord;
use async_trait::async_trait;
use ipnetwork::Ipv4Network;
use once_cell::sync::Lazy;
use regex::Regex;
use stack_common::shell;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use tracing::{debug, warn};

/// Matches `ip -o -4 address` lines: `2: eth0    inet 10.0.1.254/24 ...`
static IP_ADDR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+:\s+(\S+)\s+inet\s+(\S+)").expect("Invalid regex pattern"));

/// Source of the host's IPv4 interface addresses
#[async_trait]
pub trait InterfaceProbe: Send + Sync {
    /// Output in the format of `ip -o -4 address`
    async fn ipv4_addresses(&self) -> Result<String>;
}

/// [`InterfaceProbe`] that runs `ip -o -4 address`
#[derive(Debug, Clone)]
pub struct IpCommandProbe {
    program: String,
}

impl IpCommandProbe {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for IpCommandProbe {
    fn default() -> Self {
        Self::new(shell::IP_CMD)
    }
}

#[async_trait]
impl InterfaceProbe for IpCommandProbe {
    async fn ipv4_addresses(&self) -> Result<String> {
        let result = shell::exec(&self.program, &["-o", "-4", "address"]).await?;
        Ok(result.stdout)
    }
}

/// Finds the IPv4 network configured on `interface` in `ip -o -4 address`
/// output. The first address listed for the interface wins.
pub fn parse_interface_network(output: &str, interface: &str) -> Option<Ipv4Network> {
    for line in output.lines() {
        let Some(caps) = IP_ADDR_RE.captures(line) else {
            debug!(line, "ip regex didn't match line");
            continue;
        };

        if &caps[1] != interface {
            continue;
        }

        match caps[2].parse::<Ipv4Network>() {
            Ok(cidr) => {
                // Normalise 10.0.1.254/24 to 10.0.1.0/24
                return Ipv4Network::new(cidr.network(), cidr.prefix()).ok();
            }
            Err(e) => {
                debug!(interface, address = &caps[2], error = %e, "Unparseable interface address");
                return None;
            }
        }
    }
    None
}

/// Usable host addresses of a network, in ascending order, minus the gateway
///
/// Network and broadcast addresses are skipped except on /31 and /32
/// networks, where every address is a host.
#[derive(Debug, Clone)]
pub struct HostAddresses {
    next: u64,
    end: u64,
    gateway: Option<Ipv4Addr>,
}

impl HostAddresses {
    pub fn new(network: Ipv4Network, gateway: Option<Ipv4Addr>) -> Self {
        let first = u64::from(u32::from(network.network()));
        let last = u64::from(u32::from(network.broadcast()));
        let (next, end) = if network.prefix() >= 31 {
            (first, last + 1)
        } else {
            (first + 1, last)
        };
        Self { next, end, gateway }
    }
}

impl Iterator for HostAddresses {
    type Item = Ipv4Addr;

    fn next(&mut self) -> Option<Ipv4Addr> {
        while self.next < self.end {
            let addr = Ipv4Addr::from(self.next as u32);
            self.next += 1;
            if Some(addr) != self.gateway {
                return Some(addr);
            }
        }
        None
    }
}

/// Per-interface network cache and allocation cursors
pub struct AddressAllocator<P> {
    probe: P,
    networks: HashMap<String, Ipv4Network>,
    cursors: HashMap<String, HostAddresses>,
}

impl<P: InterfaceProbe> AddressAllocator<P> {
    pub fn new(probe: P) -> Self {
        Self {
            probe,
            networks: HashMap::new(),
            cursors: HashMap::new(),
        }
    }

    /// IPv4 network of `interface`, cached after the first successful lookup
    pub async fn resolve_network(&mut self, interface: &str) -> Result<Option<Ipv4Network>> {
        if let Some(network) = self.networks.get(interface) {
            return Ok(Some(*network));
        }

        let output = self.probe.ipv4_addresses().await?;
        let network = parse_interface_network(&output, interface);
        if let Some(network) = network {
            debug!(interface, %network, "found network");
            self.networks.insert(interface.to_string(), network);
        }
        Ok(network)
    }

    /// Subnet row matching the network on `interface`
    pub async fn subnet_for_interface<S: ClusterStore + ?Sized>(
        &mut self,
        store: &S,
        interface: &str,
    ) -> Result<Option<SubnetRecord>> {
        match self.resolve_network(interface).await? {
            Some(network) => store.find_subnet(&network).await,
            None => Ok(None),
        }
    }

    /// Logical subnet name for `interface`, if the subnet still exists
    pub async fn subnet_name<S: ClusterStore + ?Sized>(
        &mut self,
        store: &S,
        interface: &str,
    ) -> Result<Option<String>> {
        Ok(self
            .subnet_for_interface(store, interface)
            .await?
            .map(|record| record.name))
    }

    /// Candidate addresses for `interface`, or `None` if the interface has
    /// no known network or its subnet is not PXE enabled
    pub async fn hosts_for_interface<S: ClusterStore + ?Sized>(
        &mut self,
        store: &S,
        interface: &str,
    ) -> Result<Option<HostAddresses>> {
        let Some(network) = self.resolve_network(interface).await? else {
            return Ok(None);
        };

        match store.find_subnet(&network).await? {
            Some(record) if record.pxe => Ok(Some(HostAddresses::new(network, record.gateway))),
            Some(_) => {
                warn!(interface, "pxe not enabled on interface");
                Ok(None)
            }
            None => {
                warn!(interface, "unknown network for interface");
                Ok(None)
            }
        }
    }

    /// Next address on `interface` that is not recorded as in use
    ///
    /// Returns `None` when the interface is not eligible or its subnet is
    /// exhausted.
    pub async fn next_address<S: ClusterStore + ?Sized>(
        &mut self,
        store: &S,
        interface: &str,
    ) -> Result<Option<Ipv4Addr>> {
        if !self.cursors.contains_key(interface) {
            let Some(hosts) = self.hosts_for_interface(store, interface).await? else {
                return Ok(None);
            };
            self.cursors.insert(interface.to_string(), hosts);
        }

        let Some(cursor) = self.cursors.get_mut(interface) else {
            return Ok(None);
        };

        for ip in cursor.by_ref() {
            debug!(%ip, "trying IP address");
            if store.ip_in_use(ip).await? {
                debug!(%ip, "IP address already taken");
            } else {
                debug!(%ip, "IP address is free");
                return Ok(Some(ip));
            }
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use pretty_assertions::assert_eq;

    const IP_OUTPUT: &str = "\
1: lo    inet 127.0.0.1/8 scope host lo\\       valid_lft forever preferred_lft forever
2: eth0    inet 10.0.1.254/24 brd 10.0.1.255 scope global eth0\\       valid_lft forever preferred_lft forever
3: eth1    inet 192.168.7.1/30 brd 192.168.7.3 scope global eth1\\       valid_lft forever preferred_lft forever
garbage line";

    struct StaticProbe(&'static str);

    #[async_trait]
    impl InterfaceProbe for StaticProbe {
        async fn ipv4_addresses(&self) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    fn subnet(name: &str, gateway: &str, pxe: bool) -> SubnetRecord {
        SubnetRecord {
            name: name.to_string(),
            gateway: gateway.parse().ok(),
            pxe,
        }
    }

    #[test]
    fn test_parse_interface_network() {
        let net = parse_interface_network(IP_OUTPUT, "eth0").unwrap();
        assert_eq!(net.to_string(), "10.0.1.0/24");
        assert_eq!(net.mask(), Ipv4Addr::new(255, 255, 255, 0));

        let net = parse_interface_network(IP_OUTPUT, "eth1").unwrap();
        assert_eq!(net.to_string(), "192.168.7.0/30");
    }

    #[test]
    fn test_parse_interface_network_unknown_interface() {
        assert!(parse_interface_network(IP_OUTPUT, "eth9").is_none());
        assert!(parse_interface_network("", "eth0").is_none());
    }

    #[test]
    fn test_host_addresses_skip_gateway() {
        let net: Ipv4Network = "10.0.1.0/29".parse().unwrap();
        let hosts: Vec<_> = HostAddresses::new(net, Some(Ipv4Addr::new(10, 0, 1, 1))).collect();
        assert_eq!(
            hosts,
            (2..=6).map(|i| Ipv4Addr::new(10, 0, 1, i)).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_host_addresses_small_networks() {
        let net: Ipv4Network = "10.0.0.4/31".parse().unwrap();
        assert_eq!(HostAddresses::new(net, None).count(), 2);

        let net: Ipv4Network = "10.0.0.9/32".parse().unwrap();
        assert_eq!(
            HostAddresses::new(net, None).collect::<Vec<_>>(),
            vec![Ipv4Addr::new(10, 0, 0, 9)]
        );

        let net: Ipv4Network = "10.0.0.0/30".parse().unwrap();
        assert_eq!(
            HostAddresses::new(net, Some(Ipv4Addr::new(10, 0, 0, 1))).collect::<Vec<_>>(),
            vec![Ipv4Addr::new(10, 0, 0, 2)]
        );
    }

    #[tokio::test]
    async fn test_first_address_skips_gateway() {
        let store = MemoryStore::new();
        store.add_subnet("10.0.1.0/24".parse().unwrap(), subnet("private", "10.0.1.1", true));

        let mut allocator = AddressAllocator::new(StaticProbe(IP_OUTPUT));
        let ip = allocator.next_address(&store, "eth0").await.unwrap();
        assert_eq!(ip, Some(Ipv4Addr::new(10, 0, 1, 2)));
    }

    #[tokio::test]
    async fn test_no_duplicate_allocation() {
        let store = MemoryStore::new();
        store.add_subnet("10.0.1.0/24".parse().unwrap(), subnet("private", "10.0.1.1", true));

        let mut allocator = AddressAllocator::new(StaticProbe(IP_OUTPUT));
        let mut seen = std::collections::HashSet::new();
        for _ in 0..20 {
            let ip = allocator.next_address(&store, "eth0").await.unwrap().unwrap();
            assert!(seen.insert(ip), "{} handed out twice", ip);
        }
    }

    #[tokio::test]
    async fn test_skips_addresses_in_use() {
        let store = MemoryStore::new();
        store.add_subnet("10.0.1.0/24".parse().unwrap(), subnet("private", "10.0.1.1", true));
        store.add_interface(Some(Ipv4Addr::new(10, 0, 1, 2)), Some("52:54:00:00:00:01"), None);
        store.add_interface(Some(Ipv4Addr::new(10, 0, 1, 3)), None, Some("vlan7"));

        let mut allocator = AddressAllocator::new(StaticProbe(IP_OUTPUT));
        assert_eq!(
            allocator.next_address(&store, "eth0").await.unwrap(),
            Some(Ipv4Addr::new(10, 0, 1, 3))
        );
    }

    #[tokio::test]
    async fn test_pxe_disabled_yields_nothing() {
        let store = MemoryStore::new();
        store.add_subnet("10.0.1.0/24".parse().unwrap(), subnet("private", "10.0.1.1", false));

        let mut allocator = AddressAllocator::new(StaticProbe(IP_OUTPUT));
        assert_eq!(allocator.next_address(&store, "eth0").await.unwrap(), None);
        assert!(allocator.hosts_for_interface(&store, "eth0").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_subnet_yields_nothing() {
        let store = MemoryStore::new();
        let mut allocator = AddressAllocator::new(StaticProbe(IP_OUTPUT));
        assert_eq!(allocator.next_address(&store, "eth0").await.unwrap(), None);
        assert_eq!(allocator.next_address(&store, "eth9").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_exhausted_subnet_stays_exhausted() {
        let store = MemoryStore::new();
        store.add_subnet("192.168.7.0/30".parse().unwrap(), subnet("ipmi", "192.168.7.1", true));

        let mut allocator = AddressAllocator::new(StaticProbe(IP_OUTPUT));
        assert_eq!(
            allocator.next_address(&store, "eth1").await.unwrap(),
            Some(Ipv4Addr::new(192, 168, 7, 2))
        );
        assert_eq!(allocator.next_address(&store, "eth1").await.unwrap(), None);
        assert_eq!(allocator.next_address(&store, "eth1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_subnet_name() {
        let store = MemoryStore::new();
        store.add_subnet("10.0.1.0/24".parse().unwrap(), subnet("private", "10.0.1.1", true));

        let mut allocator = AddressAllocator::new(StaticProbe(IP_OUTPUT));
        assert_eq!(
            allocator.subnet_name(&store, "eth0").await.unwrap(),
            Some("private".to_string())
        );
        assert_eq!(allocator.subnet_name(&store, "eth1").await.unwrap(), None);
    }
}
