/*!
 * Object Registry Client
 * Snapshot lookups over BlueZ's managed objects
 */

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    path_address, Adapter, Bus, ManagedObjects, PropertyMap, RegistryError, Value,
    ADAPTER_INTERFACE, DEVICE_INTERFACE,
};

/// Device1 properties the harness reads, copied out of a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub path: String,
    pub address: String,
    pub name: Option<String>,
    pub alias: Option<String>,
    pub paired: bool,
    pub connected: bool,
    pub uuids: Vec<String>,
    pub adapter: Option<String>,
}

impl DeviceRecord {
    fn from_properties(path: &str, props: &PropertyMap) -> Option<Self> {
        let text = |key: &str| props.get(key).and_then(Value::as_str).map(str::to_string);
        let flag = |key: &str| props.get(key).and_then(Value::as_bool).unwrap_or(false);

        Some(Self {
            path: path.to_string(),
            address: text("Address")?,
            name: text("Name"),
            alias: text("Alias"),
            paired: flag("Paired"),
            connected: flag("Connected"),
            uuids: props
                .get("UUIDs")
                .and_then(Value::as_str_list)
                .map(<[String]>::to_vec)
                .unwrap_or_default(),
            adapter: text("Adapter"),
        })
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("Unknown")
    }

    pub fn supports(&self, uuid_fragment: &str) -> bool {
        let needle = uuid_fragment.to_lowercase();
        self.uuids.iter().any(|uuid| uuid.to_lowercase().contains(&needle))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredDevice {
    pub path: String,
    pub address: String,
    pub alias: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterInfo {
    pub name: String,
    pub path: String,
    pub address: Option<String>,
    pub alias: Option<String>,
    pub powered: bool,
}

/// Read-only view of the registry scoped to one adapter.
///
/// Every lookup fetches a fresh snapshot: device paths are rebound by BlueZ
/// after removal or re-pairing, so nothing is cached between calls.
pub struct ObjectRegistry<'a, B: Bus> {
    bus: &'a B,
    adapter: &'a Adapter,
}

impl<'a, B: Bus> ObjectRegistry<'a, B> {
    pub fn new(bus: &'a B, adapter: &'a Adapter) -> Self {
        Self { bus, adapter }
    }

    pub fn snapshot(&self) -> Result<ManagedObjects, RegistryError> {
        self.bus.managed_objects()
    }

    /// Device path for `address` under this adapter's path prefix.
    ///
    /// The first match in path order wins; BlueZ never registers the same
    /// address twice under one adapter.
    pub fn find_device_path(&self, address: &str) -> Result<Option<String>, RegistryError> {
        let prefix = self.adapter.device_prefix();
        let found = self.snapshot()?.into_iter().find_map(|(path, interfaces)| {
            let props = interfaces.get(DEVICE_INTERFACE)?;
            let matches = path.starts_with(&prefix)
                && props.get("Address").and_then(Value::as_str) == Some(address);
            matches.then_some(path)
        });

        debug!("Device path for {} on {}: {:?}", address, self.adapter.name(), found);
        Ok(found)
    }

    /// First object exposing `interface` whose path embeds `address` under this adapter.
    pub fn find_interface_under_adapter(
        &self,
        interface: &str,
        address: &str,
    ) -> Result<Option<String>, RegistryError> {
        let formatted = path_address(address);
        let prefix = self.adapter.device_prefix();
        let found = self.snapshot()?.into_iter().find_map(|(path, interfaces)| {
            let matches = interfaces.contains_key(interface)
                && path.contains(&formatted)
                && path.starts_with(&prefix);
            matches.then_some(path)
        });

        debug!("{} for {} under {}: {:?}", interface, address, self.adapter.path(), found);
        Ok(found)
    }

    /// Every device whose `Adapter` property names this adapter.
    pub fn devices(&self) -> Result<Vec<DeviceRecord>, RegistryError> {
        let adapter_path = self.adapter.path();
        Ok(self
            .snapshot()?
            .iter()
            .filter_map(|(path, interfaces)| {
                DeviceRecord::from_properties(path, interfaces.get(DEVICE_INTERFACE)?)
            })
            .filter(|device| device.adapter.as_deref() == Some(adapter_path))
            .collect())
    }

    /// `address -> name` for this adapter's devices accepted by `filter`.
    pub fn list_devices<F>(&self, filter: F) -> Result<BTreeMap<String, String>, RegistryError>
    where
        F: Fn(&DeviceRecord) -> bool,
    {
        Ok(self
            .devices()?
            .into_iter()
            .filter(|device| filter(device))
            .map(|device| {
                let name = device.display_name().to_string();
                (device.address, name)
            })
            .collect())
    }

    pub fn discovered_devices(&self) -> Result<Vec<DiscoveredDevice>, RegistryError> {
        Ok(self
            .devices()?
            .into_iter()
            .map(|device| DiscoveredDevice {
                alias: device.alias.clone().unwrap_or_else(|| "Unknown".to_string()),
                path: device.path,
                address: device.address,
            })
            .collect())
    }

    /// All controllers on the host, not only the one this view is scoped to.
    pub fn adapters(&self) -> Result<Vec<AdapterInfo>, RegistryError> {
        Ok(self
            .snapshot()?
            .iter()
            .filter_map(|(path, interfaces)| {
                let props = interfaces.get(ADAPTER_INTERFACE)?;
                let text = |key: &str| props.get(key).and_then(Value::as_str).map(str::to_string);
                Some(AdapterInfo {
                    name: path.rsplit('/').next().unwrap_or(path).to_string(),
                    path: path.clone(),
                    address: text("Address"),
                    alias: text("Alias"),
                    powered: props.get("Powered").and_then(Value::as_bool).unwrap_or(false),
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluez::MEDIA_CONTROL_INTERFACE;
    use crate::testing::FakeBus;

    const ADDR: &str = "AA:BB:CC:DD:EE:FF";

    #[test]
    fn test_find_device_path_scoped_to_adapter() {
        let bus = FakeBus::new()
            .with_device("hci1", ADDR, false, false)
            .with_device("hci0", ADDR, true, false);
        let hci0 = Adapter::new("hci0");
        let hci1 = Adapter::new("hci1");

        assert_eq!(
            ObjectRegistry::new(&bus, &hci0).find_device_path(ADDR).unwrap(),
            Some("/org/bluez/hci0/dev_AA_BB_CC_DD_EE_FF".to_string())
        );
        assert_eq!(
            ObjectRegistry::new(&bus, &hci1).find_device_path(ADDR).unwrap(),
            Some("/org/bluez/hci1/dev_AA_BB_CC_DD_EE_FF".to_string())
        );
    }

    #[test]
    fn test_adapter_prefix_does_not_match_longer_name() {
        let bus = FakeBus::new().with_device("hci10", ADDR, false, false);
        let hci1 = Adapter::new("hci1");
        assert_eq!(ObjectRegistry::new(&bus, &hci1).find_device_path(ADDR).unwrap(), None);
    }

    #[test]
    fn test_interface_lookup_ignores_longer_adapter_name() {
        let bus = FakeBus::new()
            .with_device("hci10", ADDR, true, true)
            .with_media_control("hci10", ADDR);
        let hci1 = Adapter::new("hci1");
        assert_eq!(
            ObjectRegistry::new(&bus, &hci1)
                .find_interface_under_adapter(MEDIA_CONTROL_INTERFACE, ADDR)
                .unwrap(),
            None
        );
    }

    #[test]
    fn test_find_interface_under_adapter() {
        let bus = FakeBus::new()
            .with_device("hci0", ADDR, true, true)
            .with_media_control("hci0", ADDR);
        let hci0 = Adapter::new("hci0");
        let registry = ObjectRegistry::new(&bus, &hci0);

        assert_eq!(
            registry
                .find_interface_under_adapter(MEDIA_CONTROL_INTERFACE, "aa:bb:cc:dd:ee:ff")
                .unwrap(),
            Some("/org/bluez/hci0/dev_AA_BB_CC_DD_EE_FF".to_string())
        );
        assert_eq!(
            registry
                .find_interface_under_adapter(MEDIA_CONTROL_INTERFACE, "11:22:33:44:55:66")
                .unwrap(),
            None
        );
    }

    #[test]
    fn test_list_devices_uses_adapter_property() {
        let bus = FakeBus::new()
            .with_device("hci0", ADDR, true, false)
            .with_device("hci0", "11:22:33:44:55:66", false, false)
            .with_device("hci1", "77:88:99:AA:BB:CC", true, false);
        let hci0 = Adapter::new("hci0");

        let paired = ObjectRegistry::new(&bus, &hci0).list_devices(|d| d.paired).unwrap();
        assert_eq!(paired.len(), 1);
        assert_eq!(paired.get(ADDR).map(String::as_str), Some("Device AA:BB:CC:DD:EE:FF"));
    }

    #[test]
    fn test_adapters_lists_every_controller() {
        let bus = FakeBus::new()
            .with_device("hci0", ADDR, false, false)
            .with_device("hci1", ADDR, false, false);
        let hci0 = Adapter::new("hci0");
        let names: Vec<String> = ObjectRegistry::new(&bus, &hci0)
            .adapters()
            .unwrap()
            .into_iter()
            .map(|a| a.name)
            .collect();
        assert_eq!(names, vec!["hci0".to_string(), "hci1".to_string()]);
    }

    #[test]
    fn test_registry_error_propagates() {
        let bus = FakeBus::new().unavailable();
        let hci0 = Adapter::new("hci0");
        assert!(ObjectRegistry::new(&bus, &hci0).find_device_path(ADDR).is_err());
        assert!(ObjectRegistry::new(&bus, &hci0).list_devices(|_| true).is_err());
    }
}
