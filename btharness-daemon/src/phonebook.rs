/*!
 * Phonebook Access
 * PBAP session on obexd; closing consumes the session
 */

use std::path::Path;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::bluez::{PhonebookBus, RegistryError, Value};

pub const PBAP_TARGET: &str = "PBAP";
pub const DEFAULT_PULL_TARGET: &str = "/tmp/single.vcf";
pub const DEFAULT_PULL_ALL_TARGET: &str = "/tmp/pb.vcf";

/// One `(handle, text)` row from List or Search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VcardEntry {
    pub handle: String,
    pub text: String,
}

impl From<(String, String)> for VcardEntry {
    fn from((handle, text): (String, String)) -> Self {
        Self { handle, text }
    }
}

#[derive(Debug)]
pub struct PhonebookSession {
    address: String,
    path: String,
}

impl PhonebookSession {
    /// Create the PBAP session and wait `settle` for obexd to finish the connect.
    pub fn open<P: PhonebookBus>(bus: &P, address: &str, settle: Duration) -> Result<Self, RegistryError> {
        let path = bus.create_session(address, PBAP_TARGET)?;
        info!("Phonebook session created at {}", path);
        thread::sleep(settle);
        Ok(Self {
            address: address.to_string(),
            path,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn select<P: PhonebookBus>(&self, bus: &P, location: &str, folder: &str) -> Result<(), RegistryError> {
        bus.pbap_select(&self.path, location, folder)?;
        info!("Selected {}/{} phonebook", location, folder);
        Ok(())
    }

    pub fn size<P: PhonebookBus>(&self, bus: &P) -> Result<u16, RegistryError> {
        bus.pbap_size(&self.path)
    }

    /// Named vCard fields; the reserved `BIT..` placeholders are dropped.
    pub fn filter_fields<P: PhonebookBus>(&self, bus: &P) -> Result<Vec<String>, RegistryError> {
        Ok(bus
            .pbap_filter_fields(&self.path)?
            .into_iter()
            .filter(|field| !field.starts_with("BIT"))
            .collect())
    }

    pub fn list<P: PhonebookBus>(&self, bus: &P) -> Result<Vec<VcardEntry>, RegistryError> {
        Ok(bus.pbap_list(&self.path)?.into_iter().map(VcardEntry::from).collect())
    }

    /// Returns the transfer path obexd created for the pull.
    pub fn pull<P: PhonebookBus>(&self, bus: &P, handle: &str, target: Option<&Path>) -> Result<String, RegistryError> {
        let target = target.unwrap_or_else(|| Path::new(DEFAULT_PULL_TARGET));
        info!("Pulling vCard {} to {}", handle, target.display());
        bus.pbap_pull(&self.path, handle, target)
    }

    pub fn pull_all<P: PhonebookBus>(&self, bus: &P, target: Option<&Path>) -> Result<String, RegistryError> {
        let target = target.unwrap_or_else(|| Path::new(DEFAULT_PULL_ALL_TARGET));
        info!("Pulling full phonebook to {}", target.display());
        bus.pbap_pull_all(&self.path, target)
    }

    pub fn search<P: PhonebookBus>(&self, bus: &P, field: &str, value: &str) -> Result<Vec<VcardEntry>, RegistryError> {
        info!("Searching contacts by {}: {}", field, value);
        Ok(bus
            .pbap_search(&self.path, field, value)?
            .into_iter()
            .map(VcardEntry::from)
            .collect())
    }

    pub fn property<P: PhonebookBus>(&self, bus: &P, name: &str) -> Result<Value, RegistryError> {
        bus.pbap_property(&self.path, name)
    }

    pub fn close<P: PhonebookBus>(self, bus: &P) -> Result<(), RegistryError> {
        bus.remove_session(&self.path)?;
        info!("Phonebook session {} for {} removed", self.path, self.address);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeBus;

    const ADDR: &str = "AA:BB:CC:DD:EE:FF";

    fn open(bus: &FakeBus) -> PhonebookSession {
        PhonebookSession::open(bus, ADDR, Duration::from_millis(1)).unwrap()
    }

    #[test]
    fn test_open_uses_pbap_target() {
        let bus = FakeBus::new();
        let session = open(&bus);
        assert_eq!(session.path(), "/org/bluez/obex/client/session1");
        assert_eq!(bus.calls(), vec![format!("CreateSession {} PBAP", ADDR)]);
    }

    #[test]
    fn test_filter_fields_hide_reserved_bits() {
        let bus = FakeBus::new();
        let fields = open(&bus).filter_fields(&bus).unwrap();
        assert_eq!(fields, vec!["VERSION", "FN", "TEL"]);
    }

    #[test]
    fn test_pull_defaults_target() {
        let bus = FakeBus::new();
        let session = open(&bus);
        session.pull(&bus, "1.vcf", None).unwrap();
        session.pull_all(&bus, Some(Path::new("/var/tmp/all.vcf"))).unwrap();

        let calls = bus.calls();
        assert!(calls.contains(&"Pull 1.vcf /tmp/single.vcf".to_string()));
        assert!(calls.contains(&"PullAll /var/tmp/all.vcf".to_string()));
    }

    #[test]
    fn test_list_and_search_entries() {
        let bus = FakeBus::new();
        let session = open(&bus);

        let listed = session.list(&bus).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[1].text, "Alice");

        let found = session.search(&bus, "name", "Alice").unwrap();
        assert_eq!(found, vec![VcardEntry { handle: "1.vcf".into(), text: "Alice".into() }]);
    }

    #[test]
    fn test_unknown_property_is_error() {
        let bus = FakeBus::new();
        let session = open(&bus);
        assert_eq!(session.property(&bus, "Folder").unwrap(), Value::from("telecom/pb"));
        assert!(session.property(&bus, "Bogus").is_err());
    }

    #[test]
    fn test_close_removes_session() {
        let bus = FakeBus::new();
        open(&bus).close(&bus).unwrap();
        assert_eq!(bus.count("RemoveSession"), 1);
    }
}
