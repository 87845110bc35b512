/*!
 * BlueZ Object Model
 * Remote bus seam, registry snapshot types and D-Bus names
 */

pub mod connection;
pub mod registry;
pub mod value;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::mpsc::SyncSender;
use std::time::Duration;

use thiserror::Error;

pub use registry::{DeviceRecord, DiscoveredDevice, AdapterInfo, ObjectRegistry};
pub use value::Value;

pub const BLUEZ_SERVICE: &str = "org.bluez";
pub const BLUEZ_PATH: &str = "/org/bluez";
pub const ADAPTER_INTERFACE: &str = "org.bluez.Adapter1";
pub const DEVICE_INTERFACE: &str = "org.bluez.Device1";
pub const AGENT_MANAGER_INTERFACE: &str = "org.bluez.AgentManager1";
pub const MEDIA_CONTROL_INTERFACE: &str = "org.bluez.MediaControl1";
pub const MEDIA_PLAYER_INTERFACE: &str = "org.bluez.MediaPlayer1";
pub const MEDIA_TRANSPORT_INTERFACE: &str = "org.bluez.MediaTransport1";
pub const AGENT_PATH: &str = "/test/agent";

pub const OBEX_SERVICE: &str = "org.bluez.obex";
pub const OBEX_PATH: &str = "/org/bluez/obex";
pub const OBEX_CLIENT_INTERFACE: &str = "org.bluez.obex.Client1";
pub const OBEX_OBJECT_PUSH_INTERFACE: &str = "org.bluez.obex.ObjectPush1";
pub const OBEX_TRANSFER_INTERFACE: &str = "org.bluez.obex.Transfer1";
pub const PHONEBOOK_INTERFACE: &str = "org.bluez.obex.PhonebookAccess1";

pub type PropertyMap = BTreeMap<String, Value>;
pub type InterfaceMap = BTreeMap<String, PropertyMap>;
/// `path -> interface -> property -> value`, ordered by object path.
pub type ManagedObjects = BTreeMap<String, InterfaceMap>;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum RegistryError {
    #[error("{name}: {message}")]
    Remote { name: String, message: String },
    #[error("invalid object path: {0}")]
    InvalidPath(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("property {interface}.{property} is missing")]
    MissingProperty { interface: String, property: String },
    #[error("property {property} has unexpected type {found}")]
    UnexpectedType { property: String, found: String },
}

impl From<dbus::Error> for RegistryError {
    fn from(err: dbus::Error) -> Self {
        RegistryError::Remote {
            name: err.name().unwrap_or("org.freedesktop.DBus.Error.Failed").to_string(),
            message: err.message().unwrap_or_default().to_string(),
        }
    }
}

/// A local Bluetooth controller as seen by the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Adapter {
    name: String,
    path: String,
}

impl Adapter {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            path: format!("{}/{}", BLUEZ_PATH, name),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Prefix shared by every device object that lives under this adapter.
    pub fn device_prefix(&self) -> String {
        format!("{}/", self.path)
    }
}

/// Render an address the way BlueZ embeds it in object paths.
pub fn path_address(address: &str) -> String {
    address.replace(':', "_").to_uppercase()
}

/// Remote calls the coordinator makes against `org.bluez`.
pub trait Bus {
    fn managed_objects(&self) -> Result<ManagedObjects, RegistryError>;

    fn get_property(&self, path: &str, interface: &str, name: &str) -> Result<Value, RegistryError>;

    fn set_property(&self, path: &str, interface: &str, name: &str, value: Value) -> Result<(), RegistryError>;

    /// Invoke an argument-less method such as `Pair` or `Play`.
    fn call(&self, path: &str, interface: &str, method: &str) -> Result<(), RegistryError>;

    fn remove_device(&self, adapter_path: &str, device_path: &str) -> Result<(), RegistryError>;

    fn register_agent(&self, agent_path: &str, capability: &str) -> Result<(), RegistryError>;

    fn request_default_agent(&self, agent_path: &str) -> Result<(), RegistryError>;
}

/// Subscription handle returned by [`ObexBus::watch_transfer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchToken(pub u64);

/// Remote calls the coordinator makes against `org.bluez.obex`.
pub trait ObexBus {
    fn create_session(&self, address: &str, target: &str) -> Result<String, RegistryError>;

    fn remove_session(&self, session_path: &str) -> Result<(), RegistryError>;

    /// Start an object push and return the transfer path.
    fn send_file(&self, session_path: &str, file: &Path) -> Result<String, RegistryError>;

    /// Forward every `Status` change reported for `transfer_path` into `slot`.
    fn watch_transfer(&self, transfer_path: &str, slot: SyncSender<String>) -> Result<WatchToken, RegistryError>;

    fn unwatch(&self, token: WatchToken) -> Result<(), RegistryError>;

    /// Dispatch pending notifications, blocking for at most `timeout`.
    fn process(&self, timeout: Duration) -> Result<(), RegistryError>;
}

/// Phonebook Access Profile calls on an OBEX session.
pub trait PhonebookBus: ObexBus {
    fn pbap_select(&self, session_path: &str, location: &str, folder: &str) -> Result<(), RegistryError>;

    fn pbap_size(&self, session_path: &str) -> Result<u16, RegistryError>;

    fn pbap_filter_fields(&self, session_path: &str) -> Result<Vec<String>, RegistryError>;

    fn pbap_list(&self, session_path: &str) -> Result<Vec<(String, String)>, RegistryError>;

    fn pbap_pull(&self, session_path: &str, handle: &str, target: &Path) -> Result<String, RegistryError>;

    fn pbap_pull_all(&self, session_path: &str, target: &Path) -> Result<String, RegistryError>;

    fn pbap_search(&self, session_path: &str, field: &str, value: &str) -> Result<Vec<(String, String)>, RegistryError>;

    fn pbap_property(&self, session_path: &str, name: &str) -> Result<Value, RegistryError>;
}
