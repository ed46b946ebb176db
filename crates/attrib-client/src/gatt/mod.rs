//! GATT client core
//!
//! Discovery of primary services, characteristics and descriptors, the
//! attribute tree cache, value event dispatch and watcher bookkeeping.

pub mod cache;
pub(crate) mod discovery;
pub(crate) mod notify;
pub mod session;
pub mod types;
pub(crate) mod watcher;


pub use session::{DiscoveryState, ServiceSession};
pub use types::{Characteristic, CharacteristicProperties, PresentationFormat, PrimaryService, Watcher};
