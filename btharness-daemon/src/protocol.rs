/*!
 * IPC Protocol
 * Newline-delimited JSON envelopes exchanged over the daemon socket
 */

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::bluez::{AdapterInfo, DiscoveredDevice, Value};
use crate::coordinator::{A2dpRole, Outcome, PlaybackInfo, ReceiveOutcome, TransferStatus};
use crate::hci::{CommandInfo, HciOutput};
use crate::phonebook::VcardEntry;

fn default_accept() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    Ping,
    Shutdown,

    ListAdapters,
    PairedDevices,
    DiscoveredDevices,
    ConnectedA2dpDevices { role: A2dpRole },
    StartDiscovery,
    StopDiscovery,
    RegisterAgent { capability: Option<String> },

    Pair { address: String },
    Connect { address: String },
    Disconnect { address: String },
    RemoveDevice { address: String },
    IsPaired { address: String },
    IsConnected { address: String },

    SendFile { address: String, file: PathBuf },
    ReceiveFile {
        directory: Option<PathBuf>,
        timeout_secs: Option<u64>,
        /// Keep (true) or delete (false) the incoming file.
        #[serde(default = "default_accept")]
        accept: bool,
    },
    StopReceiver,

    MediaControl { address: String, command: String },
    GetVolume { address: String },
    SetVolume { address: String, volume: u8 },
    PlaybackInfo { address: String },
    StartStream { address: String, file: PathBuf },
    StopStream,

    PbapOpen { address: String },
    PbapSelect { location: String, folder: String },
    PbapSize,
    PbapFilterFields,
    PbapList,
    PbapPull { handle: String, target: Option<PathBuf> },
    PbapPullAll { target: Option<PathBuf> },
    PbapSearch { field: String, value: String },
    PbapProperty { name: String },
    PbapClose,

    HciList { group: Option<String> },
    HciRun {
        group: String,
        command: String,
        #[serde(default)]
        values: BTreeMap<String, String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    Pong { adapter: String, version: String },
    Ack { message: String },
    Error { message: String },

    Outcome { result: Outcome },
    Flag { value: bool },
    Adapters { adapters: Vec<AdapterInfo> },
    Devices { devices: BTreeMap<String, String> },
    Discovered { devices: Vec<DiscoveredDevice> },

    Transfer { status: TransferStatus },
    Received { result: ReceiveOutcome },

    Volume { volume: Option<u8> },
    Playback { info: Option<PlaybackInfo> },

    PhonebookSession { path: String },
    PhonebookSize { size: u16 },
    FilterFields { fields: Vec<String> },
    Entries { entries: Vec<VcardEntry> },
    PhonebookTransfer { path: String },
    Property { name: String, value: Value },

    HciCommands { commands: Vec<CommandInfo> },
    HciResult { output: HciOutput },
}

impl Response {
    pub fn error(message: impl Into<String>) -> Self {
        Response::Error {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub id: Uuid,
    pub request: Request,
}

impl RequestEnvelope {
    pub fn new(request: Request) -> Self {
        Self {
            id: Uuid::new_v4(),
            request,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub id: Uuid,
    pub completed_at: DateTime<Utc>,
    pub response: Response,
}

impl ResponseEnvelope {
    pub fn new(id: Uuid, response: Response) -> Self {
        Self {
            id,
            completed_at: Utc::now(),
            response,
        }
    }
}
