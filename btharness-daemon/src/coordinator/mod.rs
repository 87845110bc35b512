/*!
 * Device Session Coordinator
 * Bounded, synchronous results for BlueZ operations that settle asynchronously
 */

pub mod media;
pub mod receive;
pub mod stream;
pub mod transfer;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::bluez::{
    Adapter, AdapterInfo, Bus, DiscoveredDevice, ObexBus, ObjectRegistry, RegistryError,
    ADAPTER_INTERFACE, AGENT_PATH, DEVICE_INTERFACE,
};
use crate::process::{ManagedProcess, ProgramSpec};

pub use media::{MediaCommand, PlaybackInfo, TrackInfo};
pub use receive::ReceiveOutcome;
pub use transfer::{wait_for_status, TransferStatus, WaitOutcome};

/// Result of a coordinator operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum Outcome {
    Success,
    /// Already in the requested state (or already absent); nothing was sent.
    Unchanged,
    NotFound,
    /// The call was accepted but the expected state was not observed in time.
    Unconfirmed,
    Invalid(String),
    Error(String),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success | Outcome::Unchanged)
    }
}

impl From<RegistryError> for Outcome {
    fn from(err: RegistryError) -> Self {
        Outcome::Error(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum A2dpRole {
    Source,
    Sink,
}

impl A2dpRole {
    /// Short-form service class UUID: Audio Source 0x110A, Audio Sink 0x110B.
    pub fn uuid_fragment(&self) -> &'static str {
        match self {
            A2dpRole::Source => "110a",
            A2dpRole::Sink => "110b",
        }
    }
}

impl FromStr for A2dpRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "source" => Ok(A2dpRole::Source),
            "sink" => Ok(A2dpRole::Sink),
            other => Err(format!("unknown A2DP role: {}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub pair_settle: Duration,
    pub remove_settle: Duration,
    pub send_timeout: Duration,
    pub receive_timeout: Duration,
    pub receive_poll: Duration,
    pub save_directory: PathBuf,
    pub receiver: ProgramSpec,
    pub player: ProgramSpec,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            pair_settle: Duration::from_secs(1),
            remove_settle: Duration::from_millis(500),
            send_timeout: Duration::from_secs(10),
            receive_timeout: Duration::from_secs(20),
            receive_poll: Duration::from_secs(1),
            save_directory: PathBuf::from("/tmp"),
            receiver: ProgramSpec::new(
                "obexpushd",
                &["-B".into(), "-o".into(), "{dir}".into(), "-n".into()],
            ),
            player: ProgramSpec::new("paplay", &["{file}".into()]),
        }
    }
}

/// Drives one adapter. Owns its bus handles, the tracked OBEX session and
/// the auxiliary processes it started; callers serialize access.
pub struct DeviceCoordinator<B: Bus, O: ObexBus> {
    adapter: Adapter,
    bus: B,
    obex: O,
    settings: CoordinatorSettings,
    last_session: Option<String>,
    receiver: Option<ManagedProcess>,
    stream: Option<ManagedProcess>,
}

impl<B: Bus, O: ObexBus> DeviceCoordinator<B, O> {
    pub fn new(adapter: Adapter, bus: B, obex: O, settings: CoordinatorSettings) -> Self {
        Self {
            adapter,
            bus,
            obex,
            settings,
            last_session: None,
            receiver: None,
            stream: None,
        }
    }

    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn obex(&self) -> &O {
        &self.obex
    }

    pub fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    pub fn registry(&self) -> ObjectRegistry<'_, B> {
        ObjectRegistry::new(&self.bus, &self.adapter)
    }

    /// Resolve the device path, mapping absence to `NotFound`.
    fn locate(&self, address: &str) -> Result<String, Outcome> {
        match self.registry().find_device_path(address) {
            Ok(Some(path)) => Ok(path),
            Ok(None) => {
                info!("Device path not found for {} on {}", address, self.adapter.name());
                Err(Outcome::NotFound)
            }
            Err(err) => {
                error!("Registry lookup for {} failed: {}", address, err);
                Err(err.into())
            }
        }
    }

    fn read_flag(&self, path: &str, property: &str) -> Result<bool, RegistryError> {
        self.bus
            .get_property(path, DEVICE_INTERFACE, property)?
            .expect_bool(property)
    }

    pub fn adapters(&self) -> Result<Vec<AdapterInfo>, RegistryError> {
        self.registry().adapters()
    }

    pub fn paired_devices(&self) -> Result<BTreeMap<String, String>, RegistryError> {
        self.registry().list_devices(|device| device.paired)
    }

    pub fn discovered_devices(&self) -> Result<Vec<DiscoveredDevice>, RegistryError> {
        self.registry().discovered_devices()
    }

    pub fn connected_a2dp_devices(&self, role: A2dpRole) -> Result<BTreeMap<String, String>, RegistryError> {
        self.registry()
            .list_devices(|device| device.connected && device.supports(role.uuid_fragment()))
    }

    pub fn start_discovery(&self) -> Outcome {
        self.adapter_call("StartDiscovery")
    }

    pub fn stop_discovery(&self) -> Outcome {
        self.adapter_call("StopDiscovery")
    }

    fn adapter_call(&self, method: &str) -> Outcome {
        match self.bus.call(self.adapter.path(), ADAPTER_INTERFACE, method) {
            Ok(()) => {
                info!("{} on {}", method, self.adapter.name());
                Outcome::Success
            }
            Err(err) => {
                warn!("{} on {} failed: {}", method, self.adapter.name(), err);
                err.into()
            }
        }
    }

    /// Register the pairing agent path and make it the default agent.
    pub fn register_agent(&self, capability: &str) -> Outcome {
        let registered = self
            .bus
            .register_agent(AGENT_PATH, capability)
            .and_then(|()| self.bus.request_default_agent(AGENT_PATH));

        match registered {
            Ok(()) => {
                info!("Registered agent with capability: {}", capability);
                Outcome::Success
            }
            Err(err) => {
                error!("Agent registration failed: {}", err);
                err.into()
            }
        }
    }

    /// `Unpaired -> Pairing -> {Paired, Failed}` with one settle-and-recheck.
    pub fn pair(&self, address: &str) -> Outcome {
        let path = match self.locate(address) {
            Ok(path) => path,
            Err(outcome) => return outcome,
        };

        // Read errors here only mean the property is not readable yet.
        if let Ok(true) = self.read_flag(&path, "Paired") {
            info!("Device {} is already paired", address);
            return Outcome::Unchanged;
        }

        info!("Initiating pairing with {}", address);
        if let Err(err) = self.bus.call(&path, DEVICE_INTERFACE, "Pair") {
            error!("Pairing with {} failed: {}", address, err);
            return err.into();
        }

        match self.read_flag(&path, "Paired") {
            Ok(true) => {
                info!("Successfully paired with {}", address);
                return Outcome::Success;
            }
            Ok(false) => {}
            Err(err) => warn!("Registry error while checking pairing status: {}", err),
        }

        thread::sleep(self.settings.pair_settle);
        if let Ok(true) = self.read_flag(&path, "Paired") {
            info!("Pairing with {} confirmed after settle", address);
            return Outcome::Success;
        }

        warn!("Pairing not confirmed with {} within the settle period", address);
        Outcome::Unconfirmed
    }

    pub fn connect(&self, address: &str) -> Outcome {
        let path = match self.locate(address) {
            Ok(path) => path,
            Err(outcome) => return outcome,
        };

        if let Err(err) = self.bus.call(&path, DEVICE_INTERFACE, "Connect") {
            info!("Connection to {} failed: {}", address, err);
            return err.into();
        }

        match self.read_flag(&path, "Connected") {
            Ok(true) => {
                info!("Connection successful to {}", address);
                Outcome::Success
            }
            Ok(false) => {
                warn!("{} accepted Connect but reports Connected=false", address);
                Outcome::Unconfirmed
            }
            Err(err) => err.into(),
        }
    }

    pub fn disconnect(&self, address: &str) -> Outcome {
        let path = match self.locate(address) {
            Ok(path) => path,
            Err(Outcome::NotFound) => return Outcome::Unchanged,
            Err(outcome) => return outcome,
        };

        match self.read_flag(&path, "Connected") {
            Ok(false) => {
                info!("Device {} is already disconnected", address);
                return Outcome::Unchanged;
            }
            Ok(true) => {}
            Err(err) => {
                info!("Error disconnecting device {}: {}", address, err);
                return err.into();
            }
        }

        if let Err(err) = self.bus.call(&path, DEVICE_INTERFACE, "Disconnect") {
            info!("Error disconnecting device {}: {}", address, err);
            return err.into();
        }

        match self.read_flag(&path, "Connected") {
            Ok(false) => {
                info!("Disconnected {}", address);
                Outcome::Success
            }
            Ok(true) => Outcome::Unconfirmed,
            Err(err) => err.into(),
        }
    }

    /// Removal is trusted once BlueZ accepts it; absence is not re-checked.
    pub fn remove_device(&self, address: &str) -> Outcome {
        let path = match self.locate(address) {
            Ok(path) => path,
            Err(Outcome::NotFound) => return Outcome::Unchanged,
            Err(outcome) => return outcome,
        };

        if let Err(err) = self.bus.remove_device(self.adapter.path(), &path) {
            error!("Removing device {} failed: {}", address, err);
            return err.into();
        }

        info!("Requested removal of device {} at path {}", address, path);
        thread::sleep(self.settings.remove_settle);
        info!("Device {} removed", address);
        Outcome::Success
    }

    pub fn is_paired(&self, address: &str) -> Result<bool, RegistryError> {
        match self.registry().find_device_path(address)? {
            Some(path) => self.read_flag(&path, "Paired"),
            None => Ok(false),
        }
    }

    pub fn is_connected(&self, address: &str) -> Result<bool, RegistryError> {
        match self.registry().find_device_path(address)? {
            Some(path) => self.read_flag(&path, "Connected"),
            None => Ok(false),
        }
    }

    /// Retire every resource this coordinator tracks.
    pub fn shutdown(&mut self) {
        self.retire_session();
        self.stop_receiver();
        self.stop_a2dp_stream();
    }
}
