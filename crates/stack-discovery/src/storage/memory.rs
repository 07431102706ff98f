//! In-memory cluster tables, enabled for tests and the `test-util` feature

use super::ClusterStore;
use crate::error::Result;
use crate::types::{Appliance, MacAddress, SubnetRecord};
use async_trait::async_trait;
use ipnetwork::Ipv4Network;
use std::net::Ipv4Addr;

/// [`ClusterStore`] over plain vectors
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: std::sync::Mutex<MemoryTables>,
}

#[derive(Debug, Default)]
struct MemoryTables {
    subnets: Vec<(Ipv4Network, SubnetRecord)>,
    /// (ip, mac, device)
    networks: Vec<(Option<Ipv4Addr>, Option<String>, Option<String>)>,
    appliances: Vec<(Appliance, String)>,
    /// (appliance id, rack, rank)
    nodes: Vec<(i64, u32, i64)>,
    boxes: Vec<String>,
    install_actions: Vec<String>,
    closed: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> std::sync::MutexGuard<'_, MemoryTables> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_subnet(&self, network: Ipv4Network, record: SubnetRecord) {
        self.tables().subnets.push((network, record));
    }

    pub fn add_interface(&self, ip: Option<Ipv4Addr>, mac: Option<&str>, device: Option<&str>) {
        self.tables().networks.push((
            ip,
            mac.map(str::to_string),
            device.map(str::to_string),
        ));
    }

    pub fn add_appliance(&self, id: i64, name: &str, long_name: &str) {
        self.tables().appliances.push((
            Appliance {
                id,
                name: name.to_string(),
            },
            long_name.to_string(),
        ));
    }

    pub fn add_node(&self, appliance_id: i64, rack: u32, rank: i64) {
        self.tables().nodes.push((appliance_id, rack, rank));
    }

    pub fn add_box(&self, name: &str) {
        self.tables().boxes.push(name.to_string());
    }

    pub fn add_install_action(&self, name: &str) {
        self.tables().install_actions.push(name.to_string());
    }

    pub fn is_closed(&self) -> bool {
        self.tables().closed
    }
}

#[async_trait]
impl ClusterStore for MemoryStore {
    async fn find_subnet(&self, network: &Ipv4Network) -> Result<Option<SubnetRecord>> {
        Ok(self
            .tables()
            .subnets
            .iter()
            .find(|(n, _)| n.network() == network.network() && n.mask() == network.mask())
            .map(|(_, record)| record.clone()))
    }

    async fn ip_in_use(&self, ip: Ipv4Addr) -> Result<bool> {
        Ok(self.tables().networks.iter().any(|(addr, _, device)| {
            *addr == Some(ip) && !device.as_deref().is_some_and(|d| d.starts_with("vlan"))
        }))
    }

    async fn mac_known(&self, mac: &MacAddress) -> Result<bool> {
        let mac = mac.to_string();
        Ok(self
            .tables()
            .networks
            .iter()
            .any(|(_, m, _)| m.as_deref() == Some(mac.as_str())))
    }

    async fn appliance_by_name(&self, name: &str) -> Result<Option<Appliance>> {
        Ok(self
            .tables()
            .appliances
            .iter()
            .find(|(a, _)| a.name == name)
            .map(|(a, _)| a.clone()))
    }

    async fn appliance_by_long_name(&self, long_name: &str) -> Result<Option<Appliance>> {
        Ok(self
            .tables()
            .appliances
            .iter()
            .find(|(_, l)| l == long_name)
            .map(|(a, _)| a.clone()))
    }

    async fn max_rank(&self, appliance_id: i64, rack: u32) -> Result<Option<i64>> {
        Ok(self
            .tables()
            .nodes
            .iter()
            .filter(|(a, r, _)| *a == appliance_id && *r == rack)
            .map(|(_, _, rank)| *rank)
            .max())
    }

    async fn box_exists(&self, name: &str) -> Result<bool> {
        Ok(self.tables().boxes.iter().any(|b| b == name))
    }

    async fn install_action_exists(&self, name: &str) -> Result<bool> {
        Ok(self.tables().install_actions.iter().any(|b| b == name))
    }

    async fn close(&self) {
        self.tables().closed = true;
    }
}
