use std::fmt;
use std::str::FromStr;

use crate::error::ClientError;

/// Bluetooth device address, stored in over-the-air (little-endian) order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BdAddr {
    pub bytes: [u8; 6],
}

impl BdAddr {
    pub fn new(bytes: [u8; 6]) -> Self {
        Self { bytes }
    }
}

impl fmt::Display for BdAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.bytes[5],
            self.bytes[4],
            self.bytes[3],
            self.bytes[2],
            self.bytes[1],
            self.bytes[0]
        )
    }
}

/// Parses the `XX:XX:XX:XX:XX:XX` form produced by `Display`.
impl FromStr for BdAddr {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 6 || parts.iter().any(|p| p.len() != 2) {
            return Err(ClientError::InvalidArguments);
        }

        let mut bytes = [0u8; 6];
        for (i, part) in parts.iter().enumerate() {
            let mut octet = [0u8; 1];
            hex::decode_to_slice(part, &mut octet).map_err(|_| ClientError::InvalidArguments)?;
            bytes[5 - i] = octet[0];
        }

        Ok(Self { bytes })
    }
}
