//! Key/value persistence of discovered attribute trees
//!
//! The store only moves strings. Their layout belongs to `gatt::cache`.

use crate::address::BdAddr;
use std::collections::BTreeMap;
use std::io;

/// Persistence primitives for one host
pub trait DeviceStorage {
    fn read_services(&self, local: &BdAddr, remote: &BdAddr) -> io::Result<Option<String>>;

    fn write_services(&mut self, local: &BdAddr, remote: &BdAddr, services: &str) -> io::Result<()>;

    fn read_characteristics(
        &self,
        local: &BdAddr,
        remote: &BdAddr,
        service_start: u16,
    ) -> io::Result<Option<String>>;

    fn write_characteristics(
        &mut self,
        local: &BdAddr,
        remote: &BdAddr,
        service_start: u16,
        characteristics: &str,
    ) -> io::Result<()>;

    /// Stores one attribute record. Records are grouped per local adapter.
    fn write_attribute(&mut self, local: &BdAddr, key: &str, value: &str) -> io::Result<()>;

    /// All attribute records of a local adapter as `(key, value)` pairs
    fn read_attributes(&self, local: &BdAddr) -> io::Result<Vec<(String, String)>>;
}

/// In-memory `DeviceStorage`
#[derive(Debug, Default, Clone)]
pub struct MemoryStorage {
    services: BTreeMap<(BdAddr, BdAddr), String>,
    characteristics: BTreeMap<(BdAddr, BdAddr, u16), String>,
    attributes: BTreeMap<BdAddr, BTreeMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DeviceStorage for MemoryStorage {
    fn read_services(&self, local: &BdAddr, remote: &BdAddr) -> io::Result<Option<String>> {
        Ok(self.services.get(&(*local, *remote)).cloned())
    }

    fn write_services(&mut self, local: &BdAddr, remote: &BdAddr, services: &str) -> io::Result<()> {
        self.services.insert((*local, *remote), services.to_string());
        Ok(())
    }

    fn read_characteristics(
        &self,
        local: &BdAddr,
        remote: &BdAddr,
        service_start: u16,
    ) -> io::Result<Option<String>> {
        Ok(self
            .characteristics
            .get(&(*local, *remote, service_start))
            .cloned())
    }

    fn write_characteristics(
        &mut self,
        local: &BdAddr,
        remote: &BdAddr,
        service_start: u16,
        characteristics: &str,
    ) -> io::Result<()> {
        self.characteristics
            .insert((*local, *remote, service_start), characteristics.to_string());
        Ok(())
    }

    fn write_attribute(&mut self, local: &BdAddr, key: &str, value: &str) -> io::Result<()> {
        self.attributes
            .entry(*local)
            .or_default()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn read_attributes(&self, local: &BdAddr) -> io::Result<Vec<(String, String)>> {
        Ok(self
            .attributes
            .get(local)
            .map(|records| {
                records
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }
}
