//! Test doubles for the cluster: an in-memory database with one PXE subnet,
//! a fixed `ip address` listing and a `stack` command line that records
//! what it is asked to do.

#![allow(dead_code)]

use async_trait::async_trait;
use stack_common::{AdminCommand, AdminCommands, ExecResult, StackResult};
use stack_discovery::{
    AddressAllocator, DhcpHandler, InterfaceProbe, MemoryStore, NodeIdentity, Registrar,
    SubnetRecord,
};
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};

pub const BACKEND_ID: i64 = 1;

/// `stack` replacement that records every command
///
/// Clones share the same record. The step named by `fail_step` (as in
/// [`AdminCommand::describe`]) exits 255.
#[derive(Clone, Default)]
pub struct RecordingAdmin {
    calls: Arc<Mutex<Vec<AdminCommand>>>,
    fail_step: Option<&'static str>,
}

impl RecordingAdmin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_at(step: &'static str) -> Self {
        Self {
            fail_step: Some(step),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<AdminCommand> {
        self.calls.lock().unwrap().clone()
    }

    pub fn steps(&self) -> Vec<&'static str> {
        self.calls().iter().map(|c| c.describe()).collect()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }
}

#[async_trait]
impl AdminCommands for RecordingAdmin {
    async fn execute(&self, command: &AdminCommand) -> StackResult<ExecResult> {
        self.calls.lock().unwrap().push(command.clone());
        if self.fail_step == Some(command.describe()) {
            return Ok(ExecResult::failed(255, "error - simulated failure"));
        }
        Ok(ExecResult::ok(""))
    }
}

/// Reports `eth0` on the given network
pub struct StaticProbe(pub &'static str);

#[async_trait]
impl InterfaceProbe for StaticProbe {
    async fn ipv4_addresses(&self) -> stack_discovery::Result<String> {
        Ok(format!(
            "1: lo    inet 127.0.0.1/8 scope host lo\n\
             2: eth0    inet {} brd 10.0.1.255 scope global eth0\n",
            self.0
        ))
    }
}

/// Database with the PXE subnet `private` (`subnet`, gateway 10.0.1.1)
pub fn cluster(subnet: &str) -> Arc<MemoryStore> {
    let store = MemoryStore::new();
    store.add_subnet(
        subnet.parse().unwrap(),
        SubnetRecord {
            name: "private".to_string(),
            gateway: Some(Ipv4Addr::new(10, 0, 1, 1)),
            pxe: true,
        },
    );
    store.add_appliance(BACKEND_ID, "backend", "Backend");
    store.add_box("default");
    store.add_install_action("default");
    Arc::new(store)
}

pub type TestHandler = DhcpHandler<MemoryStore, RecordingAdmin, StaticProbe>;

/// Handler registering backends on `eth0` (frontend address `eth0_addr`)
pub fn handler(
    store: &Arc<MemoryStore>,
    admin: RecordingAdmin,
    eth0_addr: &'static str,
    identity: NodeIdentity,
) -> TestHandler {
    DhcpHandler::new(
        Arc::clone(store),
        AddressAllocator::new(StaticProbe(eth0_addr)),
        Registrar::new(admin, "backend", "default", "default"),
        identity,
    )
}

pub fn discover_line(mac: &str, interface: &str) -> String {
    format!(
        "Mar  6 10:40:01 frontend dhcpd: DHCPDISCOVER from {} via {}: network 10.0.1.0/24: no free leases",
        mac, interface
    )
}
