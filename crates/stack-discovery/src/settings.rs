//! Start parameter validation
//!
//! Every reference a discovered node will carry (appliance, box, install
//! action) is checked against the database before the daemon starts, so a
//! typo on the command line fails immediately instead of on the first
//! DHCPDISCOVER.

use crate::config::DefaultsConfig;
use crate::error::{DiscoveryError, Result};
use crate::registrar::NodeIdentity;
use crate::storage::ClusterStore;
use crate::types::Appliance;
use stack_common::{get_attr, AdminCommands};
use tracing::{debug, info};

/// Attribute holding the default rack for discovered nodes
pub const RACK_ATTR: &str = "discovery.base.rack";

/// Attribute holding the first rank used when a rack is empty
pub const RANK_ATTR: &str = "discovery.base.rank";

/// Box and install action used when none is given
pub const DEFAULT_NAME: &str = "default";

/// Parameters accepted by `start`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartOptions {
    pub appliance_name: Option<String>,
    pub appliance_long_name: Option<String>,
    pub base_name: Option<String>,
    pub rack: Option<u32>,
    pub rank: Option<u32>,
    pub box_name: Option<String>,
    pub install_action: Option<String>,
}

/// Validated parameters the daemon runs with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoverySettings {
    pub appliance: Appliance,
    /// Hostname prefix, rack and first rank
    pub identity: NodeIdentity,
    pub box_name: String,
    pub install_action: String,
}

/// Resolves `options` against the database and cluster attributes
pub async fn resolve_settings<S, A>(
    store: &S,
    admin: &A,
    options: &StartOptions,
    defaults: &DefaultsConfig,
) -> Result<DiscoverySettings>
where
    S: ClusterStore + ?Sized,
    A: AdminCommands + ?Sized,
{
    let appliance = match (&options.appliance_name, &options.appliance_long_name) {
        (Some(_), Some(_)) => {
            return Err(DiscoveryError::invalid_config(
                "appliance",
                "Only one of appliance_name and appliance_long_name may be set",
            ))
        }
        (Some(name), None) => store.appliance_by_name(name).await?.ok_or_else(|| {
            DiscoveryError::invalid_config("appliance", format!("Unknown appliance with name {}", name))
        })?,
        (None, Some(long_name)) => store
            .appliance_by_long_name(long_name)
            .await?
            .ok_or_else(|| {
                DiscoveryError::invalid_config(
                    "appliance",
                    format!("Unknown appliance with long name {}", long_name),
                )
            })?,
        (None, None) => {
            return Err(DiscoveryError::invalid_config(
                "appliance",
                "One of either appliance_name or appliance_long_name needs to be set",
            ))
        }
    };

    let base_name = options
        .base_name
        .clone()
        .filter(|b| !b.is_empty())
        .unwrap_or_else(|| appliance.name.clone());

    let rack = match options.rack {
        Some(rack) => rack,
        None => attr_or(admin, RACK_ATTR, defaults.rack).await?,
    };

    let rank = match options.rank {
        Some(rank) => rank,
        None => match store.max_rank(appliance.id, rack).await? {
            Some(max) => max
                .checked_add(1)
                .and_then(|next| u32::try_from(next).ok())
                .ok_or_else(|| {
                    DiscoveryError::invalid_config("rank", format!("existing rank {} out of range", max))
                })?,
            None => attr_or(admin, RANK_ATTR, defaults.rank).await?,
        },
    };

    let box_name = match &options.box_name {
        None => DEFAULT_NAME.to_string(),
        Some(name) => {
            if !store.box_exists(name).await? {
                return Err(DiscoveryError::invalid_config("box", "Box does not exist"));
            }
            name.clone()
        }
    };

    let install_action = match &options.install_action {
        None => DEFAULT_NAME.to_string(),
        Some(name) => {
            if !store.install_action_exists(name).await? {
                return Err(DiscoveryError::invalid_config(
                    "installaction",
                    "Install action does not exist",
                ));
            }
            name.clone()
        }
    };

    let settings = DiscoverySettings {
        appliance,
        identity: NodeIdentity::new(base_name, rack, rank),
        box_name,
        install_action,
    };
    info!(
        appliance = %settings.appliance.name,
        first_host = %settings.identity.hostname(),
        box_name = %settings.box_name,
        install_action = %settings.install_action,
        "Resolved discovery settings"
    );
    Ok(settings)
}

/// Integer attribute value, or `fallback` when unset
async fn attr_or<A: AdminCommands + ?Sized>(admin: &A, attr: &str, fallback: u32) -> Result<u32> {
    match get_attr(admin, attr).await? {
        Some(value) => value.trim().parse().map_err(|_| {
            DiscoveryError::invalid_config(attr, format!("'{}' is not a valid number", value))
        }),
        None => {
            debug!(attr, fallback, "Attribute not set, using configured default");
            Ok(fallback)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use async_trait::async_trait;
    use stack_common::{AdminCommand, ExecResult, StackResult};
    use std::collections::HashMap;

    /// Answers `list attr` from a fixed map
    #[derive(Default)]
    struct AttrCli(HashMap<String, String>);

    impl AttrCli {
        fn with(mut self, attr: &str, value: &str) -> Self {
            self.0.insert(attr.to_string(), value.to_string());
            self
        }
    }

    #[async_trait]
    impl AdminCommands for AttrCli {
        async fn execute(&self, command: &AdminCommand) -> StackResult<ExecResult> {
            match command {
                AdminCommand::ListAttr { attr } => Ok(match self.0.get(attr) {
                    Some(v) => ExecResult::ok(format!(r#"[{{"attr": "{}", "value": "{}"}}]"#, attr, v)),
                    None => ExecResult::ok("[]"),
                }),
                other => panic!("unexpected command {:?}", other),
            }
        }
    }

    fn store() -> MemoryStore {
        let store = MemoryStore::new();
        store.add_appliance(1, "backend", "Backend");
        store.add_appliance(2, "frontend", "Frontend");
        store.add_box("sles12");
        store.add_install_action("console");
        store
    }

    fn backend() -> StartOptions {
        StartOptions {
            appliance_name: Some("backend".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_rank_follows_existing_nodes() {
        let store = store();
        store.add_node(1, 1, 2);
        store.add_node(1, 1, 5);
        store.add_node(1, 2, 30);

        let options = StartOptions {
            rack: Some(1),
            ..backend()
        };
        let settings = resolve_settings(&store, &AttrCli::default(), &options, &DefaultsConfig::default())
            .await
            .unwrap();
        assert_eq!(settings.identity.hostname(), "backend-1-6");
    }

    #[tokio::test]
    async fn test_defaults_from_attributes() {
        let cli = AttrCli::default().with(RACK_ATTR, "3").with(RANK_ATTR, "10");
        let settings = resolve_settings(&store(), &cli, &backend(), &DefaultsConfig::default())
            .await
            .unwrap();
        assert_eq!(settings.identity, NodeIdentity::new("backend", 3, 10));
        assert_eq!(settings.box_name, "default");
        assert_eq!(settings.install_action, "default");
    }

    #[tokio::test]
    async fn test_defaults_from_config_when_attributes_unset() {
        let defaults = DefaultsConfig {
            rack: 7,
            rank: 1,
            ..Default::default()
        };
        let settings = resolve_settings(&store(), &AttrCli::default(), &backend(), &defaults)
            .await
            .unwrap();
        assert_eq!(settings.identity, NodeIdentity::new("backend", 7, 1));
    }

    #[tokio::test]
    async fn test_long_name_and_base_name() {
        let options = StartOptions {
            appliance_long_name: Some("Frontend".to_string()),
            base_name: Some("fe".to_string()),
            rack: Some(0),
            rank: Some(4),
            box_name: Some("sles12".to_string()),
            install_action: Some("console".to_string()),
            ..Default::default()
        };
        let settings = resolve_settings(&store(), &AttrCli::default(), &options, &DefaultsConfig::default())
            .await
            .unwrap();
        assert_eq!(settings.appliance.name, "frontend");
        assert_eq!(settings.identity.hostname(), "fe-0-4");
        assert_eq!(settings.box_name, "sles12");
        assert_eq!(settings.install_action, "console");
    }

    #[tokio::test]
    async fn test_conflicting_appliance_options() {
        let options = StartOptions {
            appliance_long_name: Some("Backend".to_string()),
            ..backend()
        };
        let err = resolve_settings(&store(), &AttrCli::default(), &options, &DefaultsConfig::default())
            .await
            .unwrap_err();
        assert!(err.is_config_error());
    }

    #[tokio::test]
    async fn test_missing_appliance_option() {
        let err = resolve_settings(
            &store(),
            &AttrCli::default(),
            &StartOptions::default(),
            &DefaultsConfig::default(),
        )
        .await
        .unwrap_err();
        assert!(err.is_config_error());
    }

    #[tokio::test]
    async fn test_unknown_references_rejected() {
        let defaults = DefaultsConfig::default();
        let cli = AttrCli::default();

        let options = StartOptions {
            appliance_name: Some("nas".to_string()),
            ..Default::default()
        };
        assert!(resolve_settings(&store(), &cli, &options, &defaults).await.is_err());

        let options = StartOptions {
            box_name: Some("nope".to_string()),
            ..backend()
        };
        let err = resolve_settings(&store(), &cli, &options, &defaults).await.unwrap_err();
        assert_eq!(err.to_string(), "Invalid configuration for box: Box does not exist");

        let options = StartOptions {
            install_action: Some("nope".to_string()),
            ..backend()
        };
        assert!(resolve_settings(&store(), &cli, &options, &defaults)
            .await
            .unwrap_err()
            .is_config_error());
    }

    #[tokio::test]
    async fn test_existing_rank_out_of_range() {
        let cli = AttrCli::default();
        let defaults = DefaultsConfig::default();
        let options = StartOptions {
            rack: Some(0),
            ..backend()
        };

        for max in [i64::MAX, i64::from(u32::MAX)] {
            let store = store();
            store.add_node(1, 0, max);
            let err = resolve_settings(&store, &cli, &options, &defaults)
                .await
                .unwrap_err();
            assert!(err.is_config_error());
        }
    }

    #[tokio::test]
    async fn test_non_numeric_attribute() {
        let cli = AttrCli::default().with(RACK_ATTR, "left");
        let err = resolve_settings(&store(), &cli, &backend(), &DefaultsConfig::default())
            .await
            .unwrap_err();
        assert!(err.is_config_error());
    }
}
