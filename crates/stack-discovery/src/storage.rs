//! Cluster database access
//!
//! The daemon only reads from the cluster database; every write goes through
//! the `stack` command line. [`ClusterStore`] is the seam between the
//! discovery logic and MySQL.

use crate::config::DatabaseConfig;
use crate::error::Result;
use crate::types::{Appliance, MacAddress, SubnetRecord};
use async_trait::async_trait;
use ipnetwork::Ipv4Network;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions};
use std::net::Ipv4Addr;
use tracing::{debug, instrument};

#[cfg(any(test, feature = "test-util"))]
mod memory;
#[cfg(any(test, feature = "test-util"))]
pub use memory::MemoryStore;

/// Read access to the tables the discovery daemon consults
#[async_trait]
pub trait ClusterStore: Send + Sync {
    /// Subnet row whose address and mask equal `network`
    async fn find_subnet(&self, network: &Ipv4Network) -> Result<Option<SubnetRecord>>;

    /// Whether `ip` is assigned to any non-VLAN interface
    async fn ip_in_use(&self, ip: Ipv4Addr) -> Result<bool>;

    /// Whether any interface already carries `mac`
    async fn mac_known(&self, mac: &MacAddress) -> Result<bool>;

    async fn appliance_by_name(&self, name: &str) -> Result<Option<Appliance>>;

    async fn appliance_by_long_name(&self, long_name: &str) -> Result<Option<Appliance>>;

    /// Highest rank among nodes of `appliance_id` in `rack`
    async fn max_rank(&self, appliance_id: i64, rack: u32) -> Result<Option<i64>>;

    async fn box_exists(&self, name: &str) -> Result<bool>;

    /// Whether an install-type boot name called `name` exists
    async fn install_action_exists(&self, name: &str) -> Result<bool>;

    /// Releases the underlying connection.
    async fn close(&self);
}

/// [`ClusterStore`] backed by the cluster MySQL instance
///
/// The pool is capped at one connection: the daemon issues strictly
/// sequential queries from a single task.
#[derive(Debug, Clone)]
pub struct MysqlStore {
    pool: MySqlPool,
}

impl MysqlStore {
    /// Connect over the configured unix socket
    #[instrument(skip_all, fields(db = %config.name, user = %config.user))]
    pub async fn connect(config: &DatabaseConfig, password: &str) -> Result<Self> {
        debug!(socket = %config.socket.display(), "Connecting to cluster database");

        let options = MySqlConnectOptions::new()
            .host(&config.host)
            .socket(&config.socket)
            .username(&config.user)
            .password(password)
            .database(&config.name);

        let pool = MySqlPoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        debug!("Connected to cluster database");
        Ok(Self { pool })
    }
}

#[async_trait]
impl ClusterStore for MysqlStore {
    async fn find_subnet(&self, network: &Ipv4Network) -> Result<Option<SubnetRecord>> {
        let row: Option<(String, Option<String>, i64)> = sqlx::query_as(
            "SELECT name, gateway, CAST(pxe AS SIGNED) FROM subnets WHERE address=? AND mask=?",
        )
        .bind(network.network().to_string())
        .bind(network.mask().to_string())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(name, gateway, pxe)| SubnetRecord {
            name,
            gateway: gateway.and_then(|g| g.trim().parse().ok()),
            pxe: pxe == 1,
        }))
    }

    async fn ip_in_use(&self, ip: Ipv4Addr) -> Result<bool> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT count(id) FROM networks WHERE ip=? AND (device IS NULL OR device NOT LIKE 'vlan%')",
        )
        .bind(ip.to_string())
        .fetch_one(&self.pool)
        .await?;
        Ok(count != 0)
    }

    async fn mac_known(&self, mac: &MacAddress) -> Result<bool> {
        let (count,): (i64,) = sqlx::query_as("SELECT count(id) FROM networks WHERE mac=?")
            .bind(mac.to_string())
            .fetch_one(&self.pool)
            .await?;
        Ok(count != 0)
    }

    async fn appliance_by_name(&self, name: &str) -> Result<Option<Appliance>> {
        let row: Option<(i64, String)> =
            sqlx::query_as("SELECT id, name FROM appliances WHERE name=?")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(id, name)| Appliance { id, name }))
    }

    async fn appliance_by_long_name(&self, long_name: &str) -> Result<Option<Appliance>> {
        let row: Option<(i64, String)> =
            sqlx::query_as("SELECT id, name FROM appliances WHERE longname=?")
                .bind(long_name)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(id, name)| Appliance { id, name }))
    }

    async fn max_rank(&self, appliance_id: i64, rack: u32) -> Result<Option<i64>> {
        let (max,): (Option<i64>,) = sqlx::query_as(
            "SELECT CAST(max(`rank`) AS SIGNED) FROM nodes WHERE appliance=? AND rack=?",
        )
        .bind(appliance_id)
        .bind(rack)
        .fetch_one(&self.pool)
        .await?;
        Ok(max)
    }

    async fn box_exists(&self, name: &str) -> Result<bool> {
        let (count,): (i64,) = sqlx::query_as("SELECT count(id) FROM boxes WHERE name=?")
            .bind(name)
            .fetch_one(&self.pool)
            .await?;
        Ok(count != 0)
    }

    async fn install_action_exists(&self, name: &str) -> Result<bool> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT count(id) FROM bootnames WHERE type='install' AND name=?")
                .bind(name)
                .fetch_one(&self.pool)
                .await?;
        Ok(count != 0)
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
