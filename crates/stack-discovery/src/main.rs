//! stack-discovery entry point
//!
//! `--start` validates the requested node parameters against the cluster
//! database and then either runs the monitors in this process
//! (`--foreground`, used by the systemd unit) or re-executes itself detached
//! in a new session. `--stop` and `--status` act on the pid file.

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser};
use stack_common::StackCli;
use stack_discovery::{
    init_logging, read_mysql_password, resolve_settings, AddressAllocator, ClusterStore, Daemon,
    DhcpHandler, DiscoveryConfig, DiscoveryError, IpCommandProbe, MonitoredLogs, MysqlStore,
    Registrar, ShutdownCoordinator, StartOptions, DEFAULT_CONFIG_PATH,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

/// Stacki node discovery daemon
#[derive(Parser, Debug)]
#[command(name = "stack-discovery")]
#[command(author, version, about, long_about = None)]
#[command(group(ArgGroup::new("action").required(true).args(["start", "stop", "status"])))]
struct Args {
    /// Start the discovery daemon
    #[arg(long)]
    start: bool,

    /// Stop the running discovery daemon
    #[arg(long)]
    stop: bool,

    /// Report whether the discovery daemon is running
    #[arg(long)]
    status: bool,

    /// Appliance name for discovered nodes
    #[arg(long, conflicts_with = "appliance_longname")]
    appliance: Option<String>,

    /// Appliance long name for discovered nodes
    #[arg(long = "appliance-longname")]
    appliance_longname: Option<String>,

    /// Hostname prefix, defaults to the appliance name
    #[arg(long)]
    basename: Option<String>,

    /// Rack number for discovered nodes
    #[arg(long)]
    rack: Option<u32>,

    /// First rank to assign
    #[arg(long)]
    rank: Option<u32>,

    /// Box for discovered nodes
    #[arg(long = "box")]
    box_name: Option<String>,

    /// Install action for discovered nodes
    #[arg(long)]
    installaction: Option<String>,

    /// Run in this process instead of detaching
    #[arg(long)]
    foreground: bool,

    /// Configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

impl Args {
    fn start_options(&self, default_appliance: &str) -> StartOptions {
        let appliance_name = match (&self.appliance, &self.appliance_longname) {
            (None, None) => Some(default_appliance.to_string()),
            (name, _) => name.clone(),
        };

        StartOptions {
            appliance_name,
            appliance_long_name: self.appliance_longname.clone(),
            base_name: self.basename.clone(),
            rack: self.rack,
            rank: self.rank,
            box_name: self.box_name.clone(),
            install_action: self.installaction.clone(),
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    let config = match DiscoveryConfig::load_or_default(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let _log_guard = init_logging(
        &config.daemon.log_file,
        config.daemon.max_log_files,
        args.debug,
    );

    let daemon = Daemon::from_config(&config.daemon);

    if args.status {
        if daemon.is_running() {
            println!("Status: daemon is running");
        } else {
            println!("Status: daemon is stopped");
        }
        return ExitCode::SUCCESS;
    }

    if args.stop {
        if daemon.stop() {
            return ExitCode::SUCCESS;
        }
        eprintln!("Error: unable to stop discovery daemon");
        return ExitCode::FAILURE;
    }

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to create runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(start(&args, &config, daemon)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("discovery daemon failed: {:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn start(args: &Args, config: &DiscoveryConfig, mut daemon: Daemon) -> Result<()> {
    daemon.ensure_not_running()?;

    let password = read_mysql_password(&config.database.my_cnf)
        .context("unable to connect to the database")?
        .context("unable to connect to the database: no password in my.cnf")?;
    let store = Arc::new(
        MysqlStore::connect(&config.database, &password)
            .await
            .context("unable to connect to the database")?,
    );

    let admin = StackCli::new(&config.commands.stack);
    let options = args.start_options(&config.defaults.appliance);
    let settings = resolve_settings(store.as_ref(), &admin, &options, &config.defaults).await?;

    if !config.logs.dhcp_log.is_file() {
        return Err(DiscoveryError::invalid_config("dhcp_log", "DHCP log does not exist").into());
    }
    let logs = MonitoredLogs {
        dhcp_log: config.logs.dhcp_log.clone(),
        kickstart_log: config.kickstart_log()?,
    };

    if !args.foreground {
        store.close().await;
        daemon.spawn_background(std::env::args_os().skip(1))?;
        return Ok(());
    }

    info!(
        dhcp_log = %logs.dhcp_log.display(),
        kickstart_log = %logs.kickstart_log.display(),
        "Starting discovery daemon"
    );

    let allocator = AddressAllocator::new(IpCommandProbe::new(&config.commands.ip));
    let registrar = Registrar::new(
        admin,
        settings.appliance.name,
        settings.box_name,
        settings.install_action,
    );
    let handler = DhcpHandler::new(Arc::clone(&store), allocator, registrar, settings.identity);

    daemon
        .run(
            store,
            handler,
            &logs,
            &ShutdownCoordinator::new(),
            config.poll_interval(),
        )
        .await?;

    info!("Discovery daemon stopped");
    Ok(())
}
