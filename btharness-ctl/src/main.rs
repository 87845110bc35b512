/*!
 * Bluetooth Test Harness Control
 * One request per invocation, response printed as JSON
 */

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use btharness_daemon::client::HarnessClient;
use btharness_daemon::coordinator::A2dpRole;
use btharness_daemon::protocol::{Request, Response};

#[derive(Parser)]
#[command(name = "btctl")]
#[command(about = "Bluetooth Test Harness Control")]
struct Cli {
    /// Daemon socket path
    #[arg(short, long, default_value = "/run/btharness/bthd.sock")]
    socket: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the daemon is up
    Ping,
    /// Ask the daemon to exit
    Shutdown,

    /// List every adapter on the host
    Adapters,
    /// Paired devices on the daemon's adapter
    Paired,
    /// Devices seen during discovery
    Discovered,
    /// Connected A2DP devices by role
    A2dp {
        #[arg(value_parser = parse_role)]
        role: A2dpRole,
    },
    /// Start device discovery
    ScanOn,
    /// Stop device discovery
    ScanOff,
    /// Register the pairing agent
    Agent {
        /// Agent capability (defaults to the daemon configuration)
        capability: Option<String>,
    },

    Pair { address: String },
    Connect { address: String },
    Disconnect { address: String },
    Remove { address: String },
    IsPaired { address: String },
    IsConnected { address: String },

    /// Push a file over OBEX
    Send { address: String, file: PathBuf },
    /// Wait for one incoming OBEX file
    Receive {
        #[arg(short, long)]
        directory: Option<PathBuf>,
        #[arg(short, long)]
        timeout: Option<u64>,
        /// Delete the incoming file instead of keeping it
        #[arg(long)]
        reject: bool,
    },
    /// Stop a running OBEX receiver
    StopReceiver,

    /// AVRCP command: play, pause, next, previous, rewind
    Media { command: String, address: String },
    /// Read the transport volume
    Volume { address: String },
    /// Set the transport volume (0-127)
    SetVolume { address: String, volume: u8 },
    /// Player status, track and position
    Playback { address: String },
    /// Play a file while the device is attached
    Stream { address: String, file: PathBuf },
    /// Stop the stream started by the daemon
    StopStream,

    /// Phonebook access
    #[command(subcommand)]
    Pbap(PbapCommands),

    /// Raw HCI commands
    #[command(subcommand)]
    Hci(HciCommands),
}

#[derive(Subcommand)]
enum PbapCommands {
    Open { address: String },
    Select { location: String, folder: String },
    Size,
    Fields,
    List,
    Pull {
        handle: String,
        target: Option<PathBuf>,
    },
    PullAll { target: Option<PathBuf> },
    Search { field: String, value: String },
    Property { name: String },
    Close,
}

#[derive(Subcommand)]
enum HciCommands {
    /// Show the command table
    List { group: Option<String> },
    /// Run one command; unspecified parameters use their defaults
    Run {
        group: String,
        command: String,
        /// Parameter value as NAME=VALUE, repeatable
        #[arg(short, long = "param", value_parser = parse_key_val)]
        params: Vec<(String, String)>,
    },
}

fn parse_role(s: &str) -> Result<A2dpRole, String> {
    s.parse()
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got {:?}", s))?;
    Ok((key.to_string(), value.to_string()))
}

fn request(command: Commands) -> Request {
    match command {
        Commands::Ping => Request::Ping,
        Commands::Shutdown => Request::Shutdown,
        Commands::Adapters => Request::ListAdapters,
        Commands::Paired => Request::PairedDevices,
        Commands::Discovered => Request::DiscoveredDevices,
        Commands::A2dp { role } => Request::ConnectedA2dpDevices { role },
        Commands::ScanOn => Request::StartDiscovery,
        Commands::ScanOff => Request::StopDiscovery,
        Commands::Agent { capability } => Request::RegisterAgent { capability },
        Commands::Pair { address } => Request::Pair { address },
        Commands::Connect { address } => Request::Connect { address },
        Commands::Disconnect { address } => Request::Disconnect { address },
        Commands::Remove { address } => Request::RemoveDevice { address },
        Commands::IsPaired { address } => Request::IsPaired { address },
        Commands::IsConnected { address } => Request::IsConnected { address },
        Commands::Send { address, file } => Request::SendFile { address, file },
        Commands::Receive {
            directory,
            timeout,
            reject,
        } => Request::ReceiveFile {
            directory,
            timeout_secs: timeout,
            accept: !reject,
        },
        Commands::StopReceiver => Request::StopReceiver,
        Commands::Media { command, address } => Request::MediaControl { address, command },
        Commands::Volume { address } => Request::GetVolume { address },
        Commands::SetVolume { address, volume } => Request::SetVolume { address, volume },
        Commands::Playback { address } => Request::PlaybackInfo { address },
        Commands::Stream { address, file } => Request::StartStream { address, file },
        Commands::StopStream => Request::StopStream,
        Commands::Pbap(command) => match command {
            PbapCommands::Open { address } => Request::PbapOpen { address },
            PbapCommands::Select { location, folder } => Request::PbapSelect { location, folder },
            PbapCommands::Size => Request::PbapSize,
            PbapCommands::Fields => Request::PbapFilterFields,
            PbapCommands::List => Request::PbapList,
            PbapCommands::Pull { handle, target } => Request::PbapPull { handle, target },
            PbapCommands::PullAll { target } => Request::PbapPullAll { target },
            PbapCommands::Search { field, value } => Request::PbapSearch { field, value },
            PbapCommands::Property { name } => Request::PbapProperty { name },
            PbapCommands::Close => Request::PbapClose,
        },
        Commands::Hci(command) => match command {
            HciCommands::List { group } => Request::HciList { group },
            HciCommands::Run {
                group,
                command,
                params,
            } => Request::HciRun {
                group,
                command,
                values: params.into_iter().collect::<BTreeMap<_, _>>(),
            },
        },
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let client = HarnessClient::new(cli.socket);
    let reply = client.send(request(cli.command)).await?;
    println!("{}", serde_json::to_string_pretty(&reply)?);

    if let Response::Error { .. } = reply.response {
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Request {
        let cli = Cli::try_parse_from(std::iter::once("btctl").chain(args.iter().copied())).unwrap();
        request(cli.command)
    }

    #[test]
    fn test_receive_reject_flag() {
        assert_eq!(
            parse(&["receive", "--timeout", "5", "--reject"]),
            Request::ReceiveFile {
                directory: None,
                timeout_secs: Some(5),
                accept: false
            }
        );
    }

    #[test]
    fn test_hci_params() {
        let request = parse(&[
            "hci",
            "run",
            "Link Control",
            "Disconnect",
            "-p",
            "Connection_Handle=AA:BB:CC:DD:EE:FF",
            "--param",
            "Reason=0x16",
        ]);
        match request {
            Request::HciRun { values, .. } => {
                assert_eq!(values.get("Reason").map(String::as_str), Some("0x16"));
                assert_eq!(values.len(), 2);
            }
            other => panic!("unexpected request: {:?}", other),
        }
    }

    #[test]
    fn test_a2dp_role_is_validated() {
        assert_eq!(
            parse(&["a2dp", "sink"]),
            Request::ConnectedA2dpDevices { role: A2dpRole::Sink }
        );
        assert!(Cli::try_parse_from(["btctl", "a2dp", "speaker"]).is_err());
        assert!(parse_key_val("novalue").is_err());
    }
}
