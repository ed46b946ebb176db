//! Attribute tree types
//!
//! A session owns its primary services, a service owns its characteristics
//! and watchers. Nothing points back up the tree.

use crate::connection::ConnRef;
use crate::error::{ClientError, ClientResult};
use crate::surface::WatchId;
use crate::uuid::Uuid;

bitflags::bitflags! {
    /// Characteristic properties byte of a characteristic declaration
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CharacteristicProperties: u8 {
        const BROADCAST = 0x01;
        const READ = 0x02;
        const WRITE_WITHOUT_RESPONSE = 0x04;
        const WRITE = 0x08;
        const NOTIFY = 0x10;
        const INDICATE = 0x20;
        const AUTHENTICATED_SIGNED_WRITES = 0x40;
        const EXTENDED_PROPERTIES = 0x80;
    }
}

/// Characteristic Presentation Format descriptor value (0x2904)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresentationFormat {
    pub format: u8,
    pub exponent: i8,
    pub unit: u16,
    pub namespace: u8,
    pub description: u16,
}

impl PresentationFormat {
    pub const SIZE: usize = 7;

    /// Decodes the first 7 bytes of a descriptor value. Shorter values are
    /// rejected.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < Self::SIZE {
            return None;
        }

        Some(Self {
            format: data[0],
            exponent: data[1] as i8,
            unit: u16::from_le_bytes([data[2], data[3]]),
            namespace: data[4],
            description: u16::from_le_bytes([data[5], data[6]]),
        })
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let unit = self.unit.to_le_bytes();
        let description = self.description.to_le_bytes();

        [
            self.format,
            self.exponent as u8,
            unit[0],
            unit[1],
            self.namespace,
            description[0],
            description[1],
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Characteristic {
    /// `"{service}/characteristic{handle:04x}"`
    pub path: String,
    /// Value handle. The declaration sits one handle below.
    pub handle: u16,
    /// Last handle that may hold descriptors of this characteristic
    pub end: u16,
    pub properties: CharacteristicProperties,
    pub uuid: Uuid,
    pub description: Option<String>,
    pub format: Option<PresentationFormat>,
    pub value: Option<Vec<u8>>,
}

impl Characteristic {
    pub fn new(
        service_path: &str,
        handle: u16,
        end: u16,
        properties: CharacteristicProperties,
        uuid: Uuid,
    ) -> Self {
        Self {
            path: format!("{}/characteristic{:04x}", service_path, handle),
            handle,
            end,
            properties,
            uuid,
            description: None,
            format: None,
            value: None,
        }
    }

    /// Whether `handle` lies in this characteristic's `handle..=end` range
    pub fn contains(&self, handle: u16) -> bool {
        (self.handle..=self.end).contains(&handle)
    }

    /// Replaces the cached value. On allocation failure the old value stays.
    pub fn set_value(&mut self, value: &[u8]) -> ClientResult<()> {
        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(value.len())
            .map_err(|_| ClientError::OutOfMemory)?;
        buffer.extend_from_slice(value);

        self.value = Some(buffer);
        Ok(())
    }
}

/// A subscriber registered for value changes of one service
#[derive(Debug)]
pub struct Watcher {
    /// Bus name of the subscriber
    pub name: String,
    /// Object path that receives `ValueChanged`
    pub path: String,
    pub watch: WatchId,
    pub(crate) conn_ref: ConnRef,
}

#[derive(Debug)]
pub struct PrimaryService {
    /// `"{device}/service{start:04x}"`
    pub path: String,
    pub uuid: Uuid,
    pub start: u16,
    pub end: u16,
    pub characteristics: Vec<Characteristic>,
    pub watchers: Vec<Watcher>,
}

impl PrimaryService {
    pub fn new(device_path: &str, start: u16, end: u16, uuid: Uuid) -> Self {
        Self {
            path: format!("{}/service{:04x}", device_path, start),
            uuid,
            start,
            end,
            characteristics: Vec::new(),
            watchers: Vec::new(),
        }
    }

    pub fn contains(&self, handle: u16) -> bool {
        (self.start..=self.end).contains(&handle)
    }

    pub fn characteristic(&self, handle: u16) -> Option<&Characteristic> {
        self.characteristics.iter().find(|c| c.handle == handle)
    }

    pub fn characteristic_mut(&mut self, handle: u16) -> Option<&mut Characteristic> {
        self.characteristics.iter_mut().find(|c| c.handle == handle)
    }
}
