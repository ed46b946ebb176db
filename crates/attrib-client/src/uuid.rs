use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A 128-bit Bluetooth UUID.
///
/// Stored as 16 little-endian bytes, the order in which they travel in ATT
/// PDUs. 16-bit SIG-assigned values are expanded against the base UUID.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Uuid {
    bytes: [u8; 16],
}

/// "00000000-0000-1000-8000-00805F9B34FB" in little-endian order.
const BASE_UUID_BYTES: [u8; 16] = [
    0xFB, 0x34, 0x9B, 0x5F, 0x80, 0x00, 0x00, 0x80, 0x00, 0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// Offset within the base UUID where the 16-bit value is inserted.
const BASE_OFFSET: usize = 12;

impl Uuid {
    /// Creates a UUID from 16 little-endian bytes.
    pub const fn from_bytes_le(bytes: [u8; 16]) -> Self {
        Uuid { bytes }
    }

    /// Creates a UUID from 16 big-endian bytes.
    pub fn from_bytes_be(mut bytes: [u8; 16]) -> Self {
        bytes.reverse();
        Uuid { bytes }
    }

    /// Creates a 128-bit UUID from a 16-bit SIG-assigned value.
    pub const fn from_u16(uuid16: u16) -> Self {
        let mut bytes = BASE_UUID_BYTES;
        bytes[BASE_OFFSET] = uuid16 as u8;
        bytes[BASE_OFFSET + 1] = (uuid16 >> 8) as u8;
        Uuid { bytes }
    }

    /// Tries to create a UUID from a little-endian slice of 2 or 16 bytes.
    pub fn try_from_slice_le(slice: &[u8]) -> Option<Self> {
        match slice.len() {
            2 => Some(Uuid::from_u16(u16::from_le_bytes([slice[0], slice[1]]))),
            16 => {
                let mut bytes = [0u8; 16];
                bytes.copy_from_slice(slice);
                Some(Uuid::from_bytes_le(bytes))
            }
            _ => None,
        }
    }

    pub const fn as_bytes_le(&self) -> &[u8; 16] {
        &self.bytes
    }

    pub fn as_bytes_be(&self) -> [u8; 16] {
        let mut bytes = self.bytes;
        bytes.reverse();
        bytes
    }

    /// Returns the 16-bit value if this is a SIG-assigned 16-bit UUID.
    pub fn as_u16(&self) -> Option<u16> {
        if self.bytes[0..BASE_OFFSET] == BASE_UUID_BYTES[0..BASE_OFFSET]
            && self.bytes[BASE_OFFSET + 2] == 0
            && self.bytes[BASE_OFFSET + 3] == 0
        {
            Some(u16::from_le_bytes([
                self.bytes[BASE_OFFSET],
                self.bytes[BASE_OFFSET + 1],
            ]))
        } else {
            None
        }
    }
}

impl From<u16> for Uuid {
    fn from(uuid16: u16) -> Self {
        Uuid::from_u16(uuid16)
    }
}

impl PartialEq<u16> for Uuid {
    fn eq(&self, other: &u16) -> bool {
        self.as_u16() == Some(*other)
    }
}

/// Lowercase hyphenated form, e.g. `0000180f-0000-1000-8000-00805f9b34fb`.
impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.as_bytes_be();
        write!(
            f,
            "{}-{}-{}-{}-{}",
            hex::encode(&b[0..4]),
            hex::encode(&b[4..6]),
            hex::encode(&b[6..8]),
            hex::encode(&b[8..10]),
            hex::encode(&b[10..16])
        )
    }
}

impl fmt::Debug for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_u16() {
            Some(uuid16) => write!(f, "Uuid(0x{:04X})", uuid16),
            None => write!(f, "Uuid({})", self),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum UuidParseError {
    #[error("invalid UUID length")]
    InvalidLength,

    #[error("invalid UUID format")]
    InvalidFormat,

    #[error("invalid hex in UUID: {0}")]
    Hex(#[from] hex::FromHexError),
}

/// Hyphen positions of the 36-character form
const HYPHENS: [usize; 4] = [8, 13, 18, 23];

impl FromStr for Uuid {
    type Err = UuidParseError;

    /// Accepts the 36-character hyphenated form, 32 bare hex digits, or a
    /// 4-digit 16-bit short form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let cleaned = match s.len() {
            4 => {
                let mut short = [0u8; 2];
                hex::decode_to_slice(s, &mut short)?;
                return Ok(Uuid::from_u16(u16::from_be_bytes(short)));
            }
            32 => s.to_string(),
            36 => {
                let raw = s.as_bytes();
                if HYPHENS.iter().any(|&i| raw[i] != b'-') {
                    return Err(UuidParseError::InvalidFormat);
                }
                s.chars().filter(|&c| c != '-').collect::<String>()
            }
            _ => return Err(UuidParseError::InvalidLength),
        };

        if cleaned.len() != 32 {
            return Err(UuidParseError::InvalidFormat);
        }

        let mut bytes_be = [0u8; 16];
        hex::decode_to_slice(&cleaned, &mut bytes_be)?;
        Ok(Uuid::from_bytes_be(bytes_be))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid16_expansion() {
        let uuid = Uuid::from_u16(0x180F);
        assert_eq!(uuid.to_string(), "0000180f-0000-1000-8000-00805f9b34fb");
        assert_eq!(uuid.as_u16(), Some(0x180F));
        assert_eq!(uuid, 0x180Fu16);
    }

    #[test]
    fn test_parse_forms() {
        let full: Uuid = "0000180f-0000-1000-8000-00805f9b34fb".parse().unwrap();
        assert_eq!(full, Uuid::from_u16(0x180F));

        let upper: Uuid = "0000180F00001000800000805F9B34FB".parse().unwrap();
        assert_eq!(upper, full);

        let short: Uuid = "2a19".parse().unwrap();
        assert_eq!(short.as_u16(), Some(0x2A19));

        let custom: Uuid = "12345678-9abc-def0-1234-56789abcdef0".parse().unwrap();
        assert_eq!(custom.as_u16(), None);
        assert_eq!(custom.to_string(), "12345678-9abc-def0-1234-56789abcdef0");
        assert_eq!(custom.as_bytes_le()[0], 0xF0);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(
            "0000180f+0000-1000-8000-00805f9b34fb".parse::<Uuid>(),
            Err(UuidParseError::InvalidFormat)
        );
        assert_eq!("180".parse::<Uuid>(), Err(UuidParseError::InvalidLength));
        assert!(matches!("zzzz".parse::<Uuid>(), Err(UuidParseError::Hex(_))));
        assert_eq!(
            "zz".repeat(16).parse::<Uuid>(),
            Err(UuidParseError::Hex(hex::FromHexError::InvalidHexCharacter { c: 'z', index: 0 }))
        );
        assert!("0000180f-0000-1000-8000-00805f9b34-b".parse::<Uuid>().is_err());
    }
}
