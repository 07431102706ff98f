//! Host registration through the administrative command line
//!
//! A discovered node is added with six `stack` invocations issued in a fixed
//! order. The first non-zero exit aborts the rest; nothing is retried. The
//! node will be picked up again on its next DHCPDISCOVER.

use crate::allocator::{AddressAllocator, InterfaceProbe};
use crate::error::Result;
use crate::storage::ClusterStore;
use crate::types::MacAddress;
use stack_common::{AdminCommand, AdminCommands};
use std::net::Ipv4Addr;
use tracing::{error, info, instrument};

/// Name, rack and rank of the next node to be registered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity {
    pub base_name: String,
    pub rack: u32,
    pub rank: u32,
}

impl NodeIdentity {
    pub fn new(base_name: impl Into<String>, rack: u32, rank: u32) -> Self {
        Self {
            base_name: base_name.into(),
            rack,
            rank,
        }
    }

    /// `<base>-<rack>-<rank>`
    pub fn hostname(&self) -> String {
        format!("{}-{}-{}", self.base_name, self.rack, self.rank)
    }

    /// Moves on to the next rank. Only called after a successful registration.
    pub fn advance(&mut self) {
        self.rank += 1;
    }
}

/// Result of one registration attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationOutcome {
    /// Every step succeeded
    Registered { hostname: String },
    /// The interface's subnet vanished from the database
    NoSubnet,
    /// A `stack` command exited non-zero; later steps were skipped
    StepFailed {
        step: &'static str,
        exit_code: i32,
        stderr: String,
    },
}

impl RegistrationOutcome {
    pub fn is_registered(&self) -> bool {
        matches!(self, RegistrationOutcome::Registered { .. })
    }
}

/// Adds discovered nodes to the cluster
pub struct Registrar<A> {
    admin: A,
    appliance: String,
    box_name: String,
    install_action: String,
}

impl<A: AdminCommands> Registrar<A> {
    pub fn new(
        admin: A,
        appliance: impl Into<String>,
        box_name: impl Into<String>,
        install_action: impl Into<String>,
    ) -> Self {
        Self {
            admin,
            appliance: appliance.into(),
            box_name: box_name.into(),
            install_action: install_action.into(),
        }
    }

    /// The commands that register `hostname`, in execution order
    pub fn commands(
        &self,
        identity: &NodeIdentity,
        mac: &MacAddress,
        ip: Ipv4Addr,
        network: &str,
    ) -> Vec<AdminCommand> {
        let hostname = identity.hostname();
        vec![
            AdminCommand::AddHost {
                hostname: hostname.clone(),
                appliance: self.appliance.clone(),
                rack: identity.rack,
                rank: identity.rank,
                box_name: self.box_name.clone(),
            },
            AdminCommand::AddHostInterface {
                hostname: hostname.clone(),
                mac: mac.to_string(),
                ip,
                network: network.to_string(),
            },
            AdminCommand::SetInstallAction {
                hostname: hostname.clone(),
                action: self.install_action.clone(),
            },
            AdminCommand::SetBootAction {
                hostname: hostname.clone(),
            },
            AdminCommand::SyncConfig,
            AdminCommand::SyncHostConfig { hostname },
        ]
    }

    /// Registers the node behind `mac` as `identity.hostname()` with `ip`
    ///
    /// The caller owns the rank counter and advances it only on
    /// [`RegistrationOutcome::Registered`].
    #[instrument(skip(self, allocator, store, identity), fields(hostname = %identity.hostname()))]
    pub async fn register_host<P, S>(
        &self,
        allocator: &mut AddressAllocator<P>,
        store: &S,
        identity: &NodeIdentity,
        interface: &str,
        mac: &MacAddress,
        ip: Ipv4Addr,
    ) -> Result<RegistrationOutcome>
    where
        P: InterfaceProbe,
        S: ClusterStore + ?Sized,
    {
        let Some(network) = allocator.subnet_name(store, interface).await? else {
            error!(interface, "no network exists for interface");
            return Ok(RegistrationOutcome::NoSubnet);
        };

        let hostname = identity.hostname();
        for command in self.commands(identity, mac, ip, &network) {
            let result = self.admin.execute(&command).await?;
            if !result.success() {
                error!(
                    step = command.describe(),
                    exit_code = result.exit_code,
                    "failed to {} {}:\n{}",
                    command.describe(),
                    hostname,
                    result.stderr
                );
                return Ok(RegistrationOutcome::StepFailed {
                    step: command.describe(),
                    exit_code: result.exit_code,
                    stderr: result.stderr,
                });
            }
        }

        info!("successfully added host {}", hostname);
        Ok(RegistrationOutcome::Registered { hostname })
    }
}
