//! attrib-client - GATT attribute client core
//!
//! Discovers the primary services, characteristics and descriptors of a
//! remote attribute server over ATT, caches the tree in key/value storage,
//! tracks characteristic values and forwards notifications and indications
//! to registered watchers.
//!
//! The transport, the object registry, the message bus and persistence are
//! traits supplied by the host.

pub mod address;
pub mod att;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod gatt;
pub mod storage;
pub mod surface;
pub mod transport;
pub mod uuid;

// Re-export common types for convenience
pub use address::BdAddr;
pub use att::{AttError, AttErrorCode, AttResult};
pub use client::{AttribClient, Backends};
pub use config::ClientConfig;
pub use connection::{AttribConnection, ConnRef};
pub use error::{ClientError, ClientResult, TransportError};
pub use gatt::{
    Characteristic, CharacteristicProperties, DiscoveryState, PresentationFormat, PrimaryService,
    ServiceSession,
};
pub use storage::{DeviceStorage, MemoryStorage};
pub use surface::{Capability, CharacteristicInfo, ObjectRegistry, PropertyValue, WatchId, WatcherBus};
pub use transport::{AttTransport, ConnectOptions, ConnectionProfile, SecurityLevel, TransportConnector};
pub use uuid::Uuid;
