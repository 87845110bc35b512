/*!
 * Bluetooth Test Harness Daemon
 * Serves one BlueZ adapter to harness clients over a Unix socket
 */

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};

use btharness_daemon::bluez::connection::{BluezConnection, ObexConnection};
use btharness_daemon::bluez::Adapter;
use btharness_daemon::client::HarnessClient;
use btharness_daemon::config::DaemonConfig;
use btharness_daemon::coordinator::DeviceCoordinator;
use btharness_daemon::hci::HciExecutor;
use btharness_daemon::ipc::{self, IpcServer};
use btharness_daemon::protocol::{Request, Response};
use btharness_daemon::worker::{self, Harness};

#[derive(Parser)]
#[command(name = "bthd")]
#[command(about = "Bluetooth Test Harness Daemon")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path
    #[arg(short, long, default_value = "/etc/btharness/bthd.toml")]
    config: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Adapter to drive, overriding the configuration (e.g. hci1)
    #[arg(short, long)]
    adapter: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon
    Run,
    /// Check daemon status
    Status,
    /// Stop the daemon
    Stop,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(format!("btharness_daemon={},bthd={}", log_level, log_level))
        .init();

    // Load configuration
    let mut config = DaemonConfig::load(&cli.config)?;
    if let Some(adapter) = cli.adapter {
        config.bluetooth.adapter = adapter;
    }

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_daemon(config).await,
        Commands::Status => check_status(&config).await,
        Commands::Stop => stop_daemon(&config).await,
    }
}

async fn run_daemon(config: DaemonConfig) -> Result<()> {
    info!("Bluetooth test harness daemon starting on {}...", config.bluetooth.adapter);

    let worker_config = config.clone();
    let (jobs, worker_thread) = worker::spawn(move || {
        let timeout = worker_config.call_timeout();
        let bus = BluezConnection::system(timeout)?;
        let obex = ObexConnection::session(timeout)?;
        let coordinator = DeviceCoordinator::new(
            Adapter::new(&worker_config.bluetooth.adapter),
            bus,
            obex,
            worker_config.coordinator_settings(),
        );
        Ok(Harness::new(
            coordinator,
            HciExecutor::new(&worker_config.hci.tool, &worker_config.bluetooth.adapter),
            &worker_config.bluetooth.agent_capability,
            worker_config.phonebook_settle(),
        ))
    })?;

    // Start IPC server
    let listener = ipc::bind(&config.socket_path)?;
    let ipc_server = IpcServer::new(listener, jobs);

    info!("Harness daemon ready on socket: {}", config.socket_path);

    // Run the server
    ipc_server.run().await?;

    // The server dropped its job sender; the worker retires sessions and processes.
    if tokio::task::spawn_blocking(move || worker_thread.join())
        .await?
        .is_err()
    {
        error!("Worker thread panicked");
    }
    let _ = std::fs::remove_file(&config.socket_path);
    info!("Harness daemon stopped");
    Ok(())
}

async fn check_status(config: &DaemonConfig) -> Result<()> {
    let client = HarnessClient::new(config.socket_path.clone());
    match client.send(Request::Ping).await?.response {
        Response::Pong { adapter, version } => {
            println!("bthd {} running on {} ({})", version, adapter, config.socket_path);
            Ok(())
        }
        other => bail!("unexpected reply: {:?}", other),
    }
}

async fn stop_daemon(config: &DaemonConfig) -> Result<()> {
    let client = HarnessClient::new(config.socket_path.clone());
    match client.send(Request::Shutdown).await?.response {
        Response::Ack { message } => {
            println!("bthd: {}", message);
            Ok(())
        }
        other => bail!("unexpected reply: {:?}", other),
    }
}
