use crate::transport::SecurityLevel;

/// Attribute client configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Load the attribute tree from storage before discovering over the air
    pub use_cache: bool,
    /// Read every characteristic value after characteristic discovery
    pub read_values: bool,
    /// Run Find Information over each characteristic's descriptor range
    pub discover_descriptors: bool,
    /// Security level requested from the transport
    pub security_level: SecurityLevel,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            use_cache: true,
            read_values: true,
            discover_descriptors: true,
            security_level: SecurityLevel::Low,
        }
    }
}
