//! Control surface and messaging seams
//!
//! `ObjectRegistry` publishes services and characteristics as addressable
//! objects. `WatcherBus` tracks subscriber lifetimes and carries
//! `ValueChanged` messages to them.

use crate::gatt::{CharacteristicProperties, PresentationFormat};
use crate::uuid::Uuid;

/// Interface an object is published with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Primary service: `GetCharacteristics` and watcher registration
    Service,
    /// Characteristic: `GetProperties` and `SetProperty`
    Characteristic,
}

pub trait ObjectRegistry {
    fn register_object(&mut self, path: &str, capability: Capability);

    fn unregister_object(&mut self, path: &str, capability: Capability);

    /// Tells the owning device that a service object now exists
    fn device_service_added(&mut self, device: &str, service_path: &str);
}

/// Identifier of a disconnect watch installed on the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchId(pub u32);

pub trait WatcherBus {
    /// Installs a watch that fires `AttribClient::subscriber_exited` when the
    /// named subscriber leaves the bus
    fn add_disconnect_watch(&mut self, name: &str) -> WatchId;

    fn remove_watch(&mut self, id: WatchId);

    /// Sends `ValueChanged(characteristic, value)` to the subscriber object
    /// `path` owned by `name`. No reply is expected.
    fn value_changed(&mut self, name: &str, path: &str, characteristic: &str, value: &[u8]);
}

/// Property snapshot of one characteristic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicInfo {
    pub path: String,
    pub uuid: Uuid,
    /// Always empty: UUIDs are not translated to names
    pub name: String,
    pub description: Option<String>,
    pub value: Option<Vec<u8>>,
    pub format: Option<PresentationFormat>,
    pub properties: CharacteristicProperties,
}

/// Value carried by `SetProperty`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    Bytes(Vec<u8>),
    String(String),
    Bool(bool),
    U32(u32),
}

/// Whether `path` is a syntactically valid object path: `/` alone, or
/// `/`-separated non-empty elements of `[A-Za-z0-9_]` without a trailing `/`.
pub fn is_object_path(path: &str) -> bool {
    if path == "/" {
        return true;
    }

    match path.strip_prefix('/') {
        Some(rest) => rest.split('/').all(|element| {
            !element.is_empty()
                && element
                    .bytes()
                    .all(|b| b.is_ascii_alphanumeric() || b == b'_')
        }),
        None => false,
    }
}
