//! The administrative command interface.
//!
//! Host mutations are delegated to the `stack` command line. Each variant of
//! [`AdminCommand`] renders to a fixed argv; the argument order and spelling
//! are an external contract and must not drift.

use async_trait::async_trait;
use serde_json::Value;
use std::net::Ipv4Addr;

use crate::error::{StackError, StackResult};
use crate::shell::{self, ExecResult, STACK_CMD};

/// A single `stack` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    /// `add host <hostname> appliance= rack= rank= box=`
    AddHost {
        hostname: String,
        appliance: String,
        rack: u32,
        rank: u32,
        box_name: String,
    },
    /// `add host interface <hostname> ... default=true`
    AddHostInterface {
        hostname: String,
        mac: String,
        ip: Ipv4Addr,
        network: String,
    },
    /// `set host installaction <hostname> action=`
    SetInstallAction { hostname: String, action: String },
    /// `set host boot <hostname> action=install`
    SetBootAction { hostname: String },
    /// `sync config`
    SyncConfig,
    /// `sync host config <hostname>`
    SyncHostConfig { hostname: String },
    /// `list attr attr=<name> output-format=json`
    ListAttr { attr: String },
}

impl AdminCommand {
    /// Returns the argv passed to the `stack` binary.
    pub fn args(&self) -> Vec<String> {
        match self {
            AdminCommand::AddHost {
                hostname,
                appliance,
                rack,
                rank,
                box_name,
            } => vec![
                "add".to_string(),
                "host".to_string(),
                hostname.clone(),
                format!("appliance={}", appliance),
                format!("rack={}", rack),
                format!("rank={}", rank),
                format!("box={}", box_name),
            ],
            AdminCommand::AddHostInterface {
                hostname,
                mac,
                ip,
                network,
            } => vec![
                "add".to_string(),
                "host".to_string(),
                "interface".to_string(),
                hostname.clone(),
                "interface=NULL".to_string(),
                "default=true".to_string(),
                format!("mac={}", mac),
                format!("name={}", hostname),
                format!("ip={}", ip),
                format!("network={}", network),
            ],
            AdminCommand::SetInstallAction { hostname, action } => vec![
                "set".to_string(),
                "host".to_string(),
                "installaction".to_string(),
                hostname.clone(),
                format!("action={}", action),
            ],
            AdminCommand::SetBootAction { hostname } => vec![
                "set".to_string(),
                "host".to_string(),
                "boot".to_string(),
                hostname.clone(),
                "action=install".to_string(),
            ],
            AdminCommand::SyncConfig => vec!["sync".to_string(), "config".to_string()],
            AdminCommand::SyncHostConfig { hostname } => vec![
                "sync".to_string(),
                "host".to_string(),
                "config".to_string(),
                hostname.clone(),
            ],
            AdminCommand::ListAttr { attr } => vec![
                "list".to_string(),
                "attr".to_string(),
                format!("attr={}", attr),
                "output-format=json".to_string(),
            ],
        }
    }

    /// Short human description used in failure logs.
    pub fn describe(&self) -> &'static str {
        match self {
            AdminCommand::AddHost { .. } => "add host",
            AdminCommand::AddHostInterface { .. } => "add interface for host",
            AdminCommand::SetInstallAction { .. } => "set install action for host",
            AdminCommand::SetBootAction { .. } => "set boot action for host",
            AdminCommand::SyncConfig => "sync global config",
            AdminCommand::SyncHostConfig { .. } => "sync host config",
            AdminCommand::ListAttr { .. } => "list attr",
        }
    }
}

/// Executes administrative commands.
///
/// Implementations must be synchronous from the caller's point of view: the
/// returned future resolves only once the command has exited.
#[async_trait]
pub trait AdminCommands: Send + Sync {
    /// Runs `command`, returning its exit status and captured output.
    ///
    /// `Err` is reserved for commands that could not be started.
    async fn execute(&self, command: &AdminCommand) -> StackResult<ExecResult>;

    /// Binary named in logs and errors.
    fn program(&self) -> &str {
        STACK_CMD
    }
}

/// [`AdminCommands`] backed by the `stack` binary.
#[derive(Debug, Clone)]
pub struct StackCli {
    program: String,
}

impl StackCli {
    /// Uses the binary at `program`.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

}

impl Default for StackCli {
    fn default() -> Self {
        Self::new(STACK_CMD)
    }
}

#[async_trait]
impl AdminCommands for StackCli {
    async fn execute(&self, command: &AdminCommand) -> StackResult<ExecResult> {
        shell::exec(&self.program, &command.args()).await
    }

    fn program(&self) -> &str {
        &self.program
    }
}

/// Looks up a cluster attribute through `stack list attr`.
///
/// Returns `None` when the command fails or the attribute is not set.
pub async fn get_attr<A: AdminCommands + ?Sized>(
    admin: &A,
    attr: &str,
) -> StackResult<Option<String>> {
    let command = AdminCommand::ListAttr {
        attr: attr.to_string(),
    };
    let result = admin.execute(&command).await?;
    if !result.success() {
        tracing::debug!(attr, stderr = %result.stderr, "Attribute lookup failed");
        return Ok(None);
    }

    parse_attr_output(&result.stdout).map_err(|message| {
        StackError::invalid_output(shell::command_line(admin.program(), &command.args()), message)
    })
}

/// Extracts the first `value` from `stack list attr output-format=json`.
fn parse_attr_output(stdout: &str) -> Result<Option<String>, String> {
    if stdout.trim().is_empty() {
        return Ok(None);
    }

    let rows: Value = serde_json::from_str(stdout).map_err(|e| e.to_string())?;
    let rows = rows
        .as_array()
        .ok_or_else(|| "expected a JSON array".to_string())?;

    Ok(rows.first().and_then(|row| match row.get("value") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    }))
}
