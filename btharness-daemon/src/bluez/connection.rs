/*!
 * D-Bus Connections
 * Blocking dbus-rs clients for bluetoothd (system bus) and obexd (session bus)
 */

use std::path::Path as FsPath;
use std::sync::mpsc::SyncSender;
use std::time::Duration;

use dbus::arg::{PropMap, RefArg, Variant};
use dbus::blocking::stdintf::org_freedesktop_dbus::{
    ObjectManager, Properties, PropertiesPropertiesChanged,
};
use dbus::blocking::{Connection, Proxy};
use dbus::channel::Token;
use dbus::message::SignalArgs;
use dbus::{Message, Path};

use super::{
    Bus, ManagedObjects, ObexBus, PhonebookBus, PropertyMap, RegistryError, Value, WatchToken,
    ADAPTER_INTERFACE, AGENT_MANAGER_INTERFACE, BLUEZ_PATH, BLUEZ_SERVICE, OBEX_CLIENT_INTERFACE,
    OBEX_OBJECT_PUSH_INTERFACE, OBEX_PATH, OBEX_SERVICE, OBEX_TRANSFER_INTERFACE,
    PHONEBOOK_INTERFACE,
};

fn object_path(path: &str) -> Result<Path<'static>, RegistryError> {
    Path::new(path).map_err(RegistryError::InvalidPath)
}

fn file_argument(file: &FsPath) -> Result<&str, RegistryError> {
    file.to_str()
        .ok_or_else(|| RegistryError::InvalidArgument(file.display().to_string()))
}

fn convert_properties(props: &PropMap) -> PropertyMap {
    props
        .iter()
        .map(|(name, value)| (name.clone(), Value::from_ref_arg(&*value.0)))
        .collect()
}

/// Connection to `org.bluez` on the system bus.
pub struct BluezConnection {
    conn: Connection,
    timeout: Duration,
}

impl BluezConnection {
    pub fn system(timeout: Duration) -> Result<Self, RegistryError> {
        Ok(Self {
            conn: Connection::new_system()?,
            timeout,
        })
    }

    fn proxy(&self, path: &str) -> Result<Proxy<'static, &Connection>, RegistryError> {
        Ok(self.conn.with_proxy(BLUEZ_SERVICE, object_path(path)?, self.timeout))
    }
}

impl Bus for BluezConnection {
    fn managed_objects(&self) -> Result<ManagedObjects, RegistryError> {
        let objects = self.proxy("/")?.get_managed_objects()?;

        Ok(objects
            .into_iter()
            .map(|(path, interfaces)| {
                let interfaces = interfaces
                    .iter()
                    .map(|(name, props)| (name.clone(), convert_properties(props)))
                    .collect();
                (path.to_string(), interfaces)
            })
            .collect())
    }

    fn get_property(&self, path: &str, interface: &str, name: &str) -> Result<Value, RegistryError> {
        let value: Box<dyn RefArg> = self.proxy(path)?.get(interface, name)?;
        Ok(Value::from_ref_arg(&*value))
    }

    fn set_property(&self, path: &str, interface: &str, name: &str, value: Value) -> Result<(), RegistryError> {
        let proxy = self.proxy(path)?;
        match value {
            Value::Bool(v) => proxy.set(interface, name, v)?,
            Value::Byte(v) => proxy.set(interface, name, v)?,
            Value::U16(v) => proxy.set(interface, name, v)?,
            Value::U32(v) => proxy.set(interface, name, v)?,
            Value::U64(v) => proxy.set(interface, name, v)?,
            Value::I16(v) => proxy.set(interface, name, v)?,
            Value::I32(v) => proxy.set(interface, name, v)?,
            Value::I64(v) => proxy.set(interface, name, v)?,
            Value::Double(v) => proxy.set(interface, name, v)?,
            Value::Str(v) => proxy.set(interface, name, v)?,
            other => {
                return Err(RegistryError::UnexpectedType {
                    property: name.to_string(),
                    found: other.type_name().to_string(),
                })
            }
        }
        Ok(())
    }

    fn call(&self, path: &str, interface: &str, method: &str) -> Result<(), RegistryError> {
        let _: () = self.proxy(path)?.method_call(interface, method, ())?;
        Ok(())
    }

    fn remove_device(&self, adapter_path: &str, device_path: &str) -> Result<(), RegistryError> {
        let device = object_path(device_path)?;
        let _: () = self
            .proxy(adapter_path)?
            .method_call(ADAPTER_INTERFACE, "RemoveDevice", (device,))?;
        Ok(())
    }

    fn register_agent(&self, agent_path: &str, capability: &str) -> Result<(), RegistryError> {
        let agent = object_path(agent_path)?;
        let _: () = self
            .proxy(BLUEZ_PATH)?
            .method_call(AGENT_MANAGER_INTERFACE, "RegisterAgent", (agent, capability))?;
        Ok(())
    }

    fn request_default_agent(&self, agent_path: &str) -> Result<(), RegistryError> {
        let agent = object_path(agent_path)?;
        let _: () = self
            .proxy(BLUEZ_PATH)?
            .method_call(AGENT_MANAGER_INTERFACE, "RequestDefaultAgent", (agent,))?;
        Ok(())
    }
}

/// Connection to `org.bluez.obex` on the session bus.
pub struct ObexConnection {
    conn: Connection,
    timeout: Duration,
}

impl ObexConnection {
    pub fn session(timeout: Duration) -> Result<Self, RegistryError> {
        Ok(Self {
            conn: Connection::new_session()?,
            timeout,
        })
    }

    fn proxy(&self, path: &str) -> Result<Proxy<'static, &Connection>, RegistryError> {
        Ok(self.conn.with_proxy(OBEX_SERVICE, object_path(path)?, self.timeout))
    }
}

impl ObexBus for ObexConnection {
    fn create_session(&self, address: &str, target: &str) -> Result<String, RegistryError> {
        let mut args = PropMap::new();
        args.insert("Target".to_string(), Variant(Box::new(target.to_string())));

        let (session,): (Path<'static>,) = self
            .proxy(OBEX_PATH)?
            .method_call(OBEX_CLIENT_INTERFACE, "CreateSession", (address, args))?;
        Ok(session.to_string())
    }

    fn remove_session(&self, session_path: &str) -> Result<(), RegistryError> {
        let session = object_path(session_path)?;
        let _: () = self
            .proxy(OBEX_PATH)?
            .method_call(OBEX_CLIENT_INTERFACE, "RemoveSession", (session,))?;
        Ok(())
    }

    fn send_file(&self, session_path: &str, file: &FsPath) -> Result<String, RegistryError> {
        let (transfer, _props): (Path<'static>, PropMap) = self
            .proxy(session_path)?
            .method_call(OBEX_OBJECT_PUSH_INTERFACE, "SendFile", (file_argument(file)?,))?;
        Ok(transfer.to_string())
    }

    fn watch_transfer(&self, transfer_path: &str, slot: SyncSender<String>) -> Result<WatchToken, RegistryError> {
        let path = object_path(transfer_path)?;
        // No sender in the rule: signals arrive from obexd's unique name.
        let rule = PropertiesPropertiesChanged::match_rule(None, Some(&path)).static_clone();

        let token = self.conn.add_match(
            rule,
            move |changed: PropertiesPropertiesChanged, _: &Connection, _: &Message| {
                if changed.interface_name == OBEX_TRANSFER_INTERFACE {
                    if let Some(status) = changed
                        .changed_properties
                        .get("Status")
                        .and_then(|value| value.0.as_str())
                    {
                        let _ = slot.try_send(status.to_string());
                    }
                }
                true
            },
        )?;
        Ok(WatchToken(token.0 as u64))
    }

    fn unwatch(&self, token: WatchToken) -> Result<(), RegistryError> {
        self.conn.remove_match(Token(token.0 as usize))?;
        Ok(())
    }

    fn process(&self, timeout: Duration) -> Result<(), RegistryError> {
        self.conn.process(timeout)?;
        Ok(())
    }
}

impl PhonebookBus for ObexConnection {
    fn pbap_select(&self, session_path: &str, location: &str, folder: &str) -> Result<(), RegistryError> {
        let _: () = self
            .proxy(session_path)?
            .method_call(PHONEBOOK_INTERFACE, "Select", (location, folder))?;
        Ok(())
    }

    fn pbap_size(&self, session_path: &str) -> Result<u16, RegistryError> {
        let (size,): (u16,) = self
            .proxy(session_path)?
            .method_call(PHONEBOOK_INTERFACE, "GetSize", ())?;
        Ok(size)
    }

    fn pbap_filter_fields(&self, session_path: &str) -> Result<Vec<String>, RegistryError> {
        let (fields,): (Vec<String>,) = self
            .proxy(session_path)?
            .method_call(PHONEBOOK_INTERFACE, "ListFilterFields", ())?;
        Ok(fields)
    }

    fn pbap_list(&self, session_path: &str) -> Result<Vec<(String, String)>, RegistryError> {
        let (entries,): (Vec<(String, String)>,) = self
            .proxy(session_path)?
            .method_call(PHONEBOOK_INTERFACE, "List", (PropMap::new(),))?;
        Ok(entries)
    }

    fn pbap_pull(&self, session_path: &str, handle: &str, target: &FsPath) -> Result<String, RegistryError> {
        let (transfer, _props): (Path<'static>, PropMap) = self.proxy(session_path)?.method_call(
            PHONEBOOK_INTERFACE,
            "Pull",
            (handle, file_argument(target)?, PropMap::new()),
        )?;
        Ok(transfer.to_string())
    }

    fn pbap_pull_all(&self, session_path: &str, target: &FsPath) -> Result<String, RegistryError> {
        let (transfer, _props): (Path<'static>, PropMap) = self.proxy(session_path)?.method_call(
            PHONEBOOK_INTERFACE,
            "PullAll",
            (file_argument(target)?, PropMap::new()),
        )?;
        Ok(transfer.to_string())
    }

    fn pbap_search(&self, session_path: &str, field: &str, value: &str) -> Result<Vec<(String, String)>, RegistryError> {
        let (results,): (Vec<(String, String)>,) = self
            .proxy(session_path)?
            .method_call(PHONEBOOK_INTERFACE, "Search", (field, value, PropMap::new()))?;
        Ok(results)
    }

    fn pbap_property(&self, session_path: &str, name: &str) -> Result<Value, RegistryError> {
        let value: Box<dyn RefArg> = self.proxy(session_path)?.get(PHONEBOOK_INTERFACE, name)?;
        Ok(Value::from_ref_arg(&*value))
    }
}
