//! In-memory registry used by the unit tests.
//!
//! Records every remote call as `"<Method> <target>"` so tests can assert
//! which mutations were (or were not) issued.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::mpsc::SyncSender;
use std::thread;
use std::time::Duration;

use crate::bluez::{
    path_address, Bus, ManagedObjects, ObexBus, PhonebookBus, RegistryError, Value, WatchToken,
    ADAPTER_INTERFACE, BLUEZ_PATH, DEVICE_INTERFACE, MEDIA_CONTROL_INTERFACE,
    MEDIA_PLAYER_INTERFACE, MEDIA_TRANSPORT_INTERFACE,
};

#[derive(Default)]
struct FakeState {
    objects: ManagedObjects,
    calls: Vec<String>,
    unavailable: bool,
    failing: HashSet<String>,
    pair_unconfirmed: bool,
    connect_unconfirmed: bool,
    sessions: u32,
    transfer_status: Option<String>,
    watches: Vec<(u64, SyncSender<String>)>,
    next_watch: u64,
}

#[derive(Default)]
pub struct FakeBus {
    state: RefCell<FakeState>,
}

pub fn device_path(adapter: &str, address: &str) -> String {
    format!("{}/{}/dev_{}", BLUEZ_PATH, adapter, path_address(address))
}

fn remote_error(message: &str) -> RegistryError {
    RegistryError::Remote {
        name: "org.bluez.Error.Failed".to_string(),
        message: message.to_string(),
    }
}

impl FakeBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(self, path: &str, interface: &str, props: Vec<(&str, Value)>) -> Self {
        {
            let mut state = self.state.borrow_mut();
            let entry = state
                .objects
                .entry(path.to_string())
                .or_default()
                .entry(interface.to_string())
                .or_default();
            for (name, value) in props {
                entry.insert(name.to_string(), value);
            }
        }
        self
    }

    pub fn with_device(self, adapter: &str, address: &str, paired: bool, connected: bool) -> Self {
        let adapter_path = format!("{}/{}", BLUEZ_PATH, adapter);
        self.insert(
            &adapter_path,
            ADAPTER_INTERFACE,
            vec![("Alias", Value::from(adapter)), ("Powered", Value::Bool(true))],
        )
        .insert(
            &device_path(adapter, address),
            DEVICE_INTERFACE,
            vec![
                ("Address", Value::from(address)),
                ("Name", Value::Str(format!("Device {}", address))),
                ("Alias", Value::Str(format!("Alias {}", address))),
                ("Paired", Value::Bool(paired)),
                ("Connected", Value::Bool(connected)),
                ("Adapter", Value::Path(adapter_path.clone())),
                ("UUIDs", Value::StrList(Vec::new())),
            ],
        )
    }

    pub fn with_uuids(self, adapter: &str, address: &str, uuids: &[&str]) -> Self {
        let uuids = uuids.iter().map(|u| u.to_string()).collect();
        self.insert(
            &device_path(adapter, address),
            DEVICE_INTERFACE,
            vec![("UUIDs", Value::StrList(uuids))],
        )
    }

    pub fn with_media_control(self, adapter: &str, address: &str) -> Self {
        self.insert(&device_path(adapter, address), MEDIA_CONTROL_INTERFACE, vec![])
    }

    pub fn with_player(self, adapter: &str, address: &str, status: &str, position: u32) -> Self {
        let mut track = BTreeMap::new();
        track.insert("Title".to_string(), Value::from("Test Tone"));
        track.insert("Artist".to_string(), Value::from("Harness"));
        track.insert("Album".to_string(), Value::from("Conformance"));
        track.insert("Duration".to_string(), Value::U32(240_000));

        let path = format!("{}/player0", device_path(adapter, address));
        self.insert(
            &path,
            MEDIA_PLAYER_INTERFACE,
            vec![
                ("Status", Value::from(status)),
                ("Track", Value::Dict(track)),
                ("Position", Value::U32(position)),
            ],
        )
    }

    pub fn with_transport(self, adapter: &str, address: &str, volume: u16) -> Self {
        let path = format!("{}/sep1/fd0", device_path(adapter, address));
        self.insert(&path, MEDIA_TRANSPORT_INTERFACE, vec![("Volume", Value::U16(volume))])
    }

    /// Every call fails as if bluetoothd had gone away.
    pub fn unavailable(self) -> Self {
        self.state.borrow_mut().unavailable = true;
        self
    }

    pub fn failing(self, method: &str) -> Self {
        self.state.borrow_mut().failing.insert(method.to_string());
        self
    }

    /// `Pair` is accepted but `Paired` never flips.
    pub fn pair_unconfirmed(self) -> Self {
        self.state.borrow_mut().pair_unconfirmed = true;
        self
    }

    pub fn connect_unconfirmed(self) -> Self {
        self.state.borrow_mut().connect_unconfirmed = true;
        self
    }

    /// Status delivered to transfer watchers on the next `process` call.
    pub fn with_transfer_status(self, status: &str) -> Self {
        self.state.borrow_mut().transfer_status = Some(status.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.borrow().calls.clone()
    }

    pub fn count(&self, method: &str) -> usize {
        let prefix = format!("{} ", method);
        self.state
            .borrow()
            .calls
            .iter()
            .filter(|call| call.starts_with(&prefix) || call.as_str() == method)
            .count()
    }

    pub fn property(&self, path: &str, interface: &str, name: &str) -> Option<Value> {
        self.state
            .borrow()
            .objects
            .get(path)?
            .get(interface)?
            .get(name)
            .cloned()
    }

    fn record(&self, method: &str, target: &str) -> Result<(), RegistryError> {
        let mut state = self.state.borrow_mut();
        state.calls.push(format!("{} {}", method, target));
        if state.unavailable {
            return Err(remote_error("bus unavailable"));
        }
        if state.failing.contains(method) {
            return Err(remote_error(&format!("{} failed", method)));
        }
        Ok(())
    }

    fn check(&self) -> Result<(), RegistryError> {
        if self.state.borrow().unavailable {
            return Err(remote_error("bus unavailable"));
        }
        Ok(())
    }

    fn update(&self, path: &str, interface: &str, name: &str, value: Value) {
        if let Some(props) = self
            .state
            .borrow_mut()
            .objects
            .get_mut(path)
            .and_then(|interfaces| interfaces.get_mut(interface))
        {
            props.insert(name.to_string(), value);
        }
    }
}

impl Bus for FakeBus {
    fn managed_objects(&self) -> Result<ManagedObjects, RegistryError> {
        self.check()?;
        Ok(self.state.borrow().objects.clone())
    }

    fn get_property(&self, path: &str, interface: &str, name: &str) -> Result<Value, RegistryError> {
        self.check()?;
        if self.state.borrow().failing.contains("Get") {
            return Err(remote_error("Get failed"));
        }
        self.property(path, interface, name)
            .ok_or_else(|| RegistryError::MissingProperty {
                interface: interface.to_string(),
                property: name.to_string(),
            })
    }

    fn set_property(&self, path: &str, interface: &str, name: &str, value: Value) -> Result<(), RegistryError> {
        self.record("Set", &format!("{} {}.{}", path, interface, name))?;
        if self.property(path, interface, name).is_none() {
            return Err(remote_error("no such property"));
        }
        self.update(path, interface, name, value);
        Ok(())
    }

    fn call(&self, path: &str, interface: &str, method: &str) -> Result<(), RegistryError> {
        self.record(method, path)?;
        let (pair_unconfirmed, connect_unconfirmed) = {
            let state = self.state.borrow();
            (state.pair_unconfirmed, state.connect_unconfirmed)
        };
        match method {
            "Pair" if !pair_unconfirmed => self.update(path, interface, "Paired", Value::Bool(true)),
            "Connect" if !connect_unconfirmed => {
                self.update(path, interface, "Connected", Value::Bool(true))
            }
            "Disconnect" => self.update(path, interface, "Connected", Value::Bool(false)),
            _ => {}
        }
        Ok(())
    }

    fn remove_device(&self, _adapter_path: &str, device_path: &str) -> Result<(), RegistryError> {
        self.record("RemoveDevice", device_path)?;
        self.state
            .borrow_mut()
            .objects
            .retain(|path, _| !path.starts_with(device_path));
        Ok(())
    }

    fn register_agent(&self, agent_path: &str, capability: &str) -> Result<(), RegistryError> {
        self.record("RegisterAgent", &format!("{} {}", agent_path, capability))
    }

    fn request_default_agent(&self, agent_path: &str) -> Result<(), RegistryError> {
        self.record("RequestDefaultAgent", agent_path)
    }
}

impl ObexBus for FakeBus {
    fn create_session(&self, address: &str, target: &str) -> Result<String, RegistryError> {
        self.record("CreateSession", &format!("{} {}", address, target))?;
        let mut state = self.state.borrow_mut();
        state.sessions += 1;
        Ok(format!("/org/bluez/obex/client/session{}", state.sessions))
    }

    fn remove_session(&self, session_path: &str) -> Result<(), RegistryError> {
        self.record("RemoveSession", session_path)
    }

    fn send_file(&self, session_path: &str, file: &Path) -> Result<String, RegistryError> {
        self.record("SendFile", &format!("{} {}", session_path, file.display()))?;
        Ok(format!("{}/transfer0", session_path))
    }

    fn watch_transfer(&self, transfer_path: &str, slot: SyncSender<String>) -> Result<WatchToken, RegistryError> {
        self.record("Watch", transfer_path)?;
        let mut state = self.state.borrow_mut();
        state.next_watch += 1;
        let token = state.next_watch;
        state.watches.push((token, slot));
        Ok(WatchToken(token))
    }

    fn unwatch(&self, token: WatchToken) -> Result<(), RegistryError> {
        self.record("Unwatch", &token.0.to_string())?;
        self.state.borrow_mut().watches.retain(|(id, _)| *id != token.0);
        Ok(())
    }

    fn process(&self, timeout: Duration) -> Result<(), RegistryError> {
        self.check()?;
        if self.state.borrow().failing.contains("process") {
            return Err(remote_error("connection lost"));
        }
        let delivery = {
            let mut state = self.state.borrow_mut();
            if state.watches.is_empty() {
                None
            } else {
                state.transfer_status.take()
            }
        };
        match delivery {
            Some(status) => {
                for (_, slot) in &self.state.borrow().watches {
                    let _ = slot.try_send(status.clone());
                }
            }
            None => thread::sleep(timeout),
        }
        Ok(())
    }
}

impl PhonebookBus for FakeBus {
    fn pbap_select(&self, session_path: &str, location: &str, folder: &str) -> Result<(), RegistryError> {
        self.record("Select", &format!("{} {}/{}", session_path, location, folder))
    }

    fn pbap_size(&self, session_path: &str) -> Result<u16, RegistryError> {
        self.record("GetSize", session_path)?;
        Ok(2)
    }

    fn pbap_filter_fields(&self, session_path: &str) -> Result<Vec<String>, RegistryError> {
        self.record("ListFilterFields", session_path)?;
        Ok(vec!["VERSION".into(), "FN".into(), "BIT62".into(), "TEL".into()])
    }

    fn pbap_list(&self, session_path: &str) -> Result<Vec<(String, String)>, RegistryError> {
        self.record("List", session_path)?;
        Ok(vec![
            ("0.vcf".into(), "Owner".into()),
            ("1.vcf".into(), "Alice".into()),
        ])
    }

    fn pbap_pull(&self, session_path: &str, handle: &str, target: &Path) -> Result<String, RegistryError> {
        self.record("Pull", &format!("{} {}", handle, target.display()))?;
        Ok(format!("{}/transfer1", session_path))
    }

    fn pbap_pull_all(&self, session_path: &str, target: &Path) -> Result<String, RegistryError> {
        self.record("PullAll", &target.display().to_string())?;
        Ok(format!("{}/transfer2", session_path))
    }

    fn pbap_search(&self, session_path: &str, field: &str, value: &str) -> Result<Vec<(String, String)>, RegistryError> {
        self.record("Search", &format!("{} {}={}", session_path, field, value))?;
        Ok(vec![("1.vcf".into(), value.to_string())])
    }

    fn pbap_property(&self, session_path: &str, name: &str) -> Result<Value, RegistryError> {
        self.record("GetProperty", &format!("{} {}", session_path, name))?;
        match name {
            "Folder" => Ok(Value::from("telecom/pb")),
            _ => Err(remote_error("no such property")),
        }
    }
}
