//! Transport seam
//!
//! The client never frames PDUs itself. A `TransportConnector` opens an
//! `AttTransport` for a device and the event loop feeds the transport's
//! completions back through `AttribClient`.

use crate::address::BdAddr;
use crate::att::constants::ATT_CID;
use crate::error::TransportError;

/// How the remote attribute server is reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionProfile {
    /// LE link using the fixed ATT channel
    LowEnergy,
    /// BR/EDR link using an L2CAP PSM
    BasicRate { psm: u16 },
}

impl ConnectionProfile {
    /// Whether the profile names a usable channel. A BR/EDR PSM must have an
    /// odd least significant octet and an even most significant octet.
    pub fn is_valid(&self) -> bool {
        match self {
            ConnectionProfile::LowEnergy => true,
            ConnectionProfile::BasicRate { psm } => psm & 0x0101 == 0x0001,
        }
    }
}

/// Link security requested when connecting
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SecurityLevel {
    /// No security requirement
    Low,
    /// Encryption without MITM protection
    Medium,
    /// Encryption with MITM protection
    High,
}

/// Channel selection passed to the connector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Cid(u16),
    Psm(u16),
}

/// Everything a connector needs to open one ATT session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    pub local: BdAddr,
    pub remote: BdAddr,
    pub channel: Channel,
    pub security_level: SecurityLevel,
    /// Open for unsolicited PDUs only
    pub listen: bool,
}

impl ConnectOptions {
    pub fn new(
        local: BdAddr,
        remote: BdAddr,
        profile: ConnectionProfile,
        security_level: SecurityLevel,
        listen: bool,
    ) -> Result<Self, TransportError> {
        let channel = match profile {
            ConnectionProfile::LowEnergy => Channel::Cid(ATT_CID),
            ConnectionProfile::BasicRate { psm } if profile.is_valid() => Channel::Psm(psm),
            ConnectionProfile::BasicRate { psm } => {
                return Err(TransportError::InvalidParameters(format!(
                    "invalid PSM 0x{:04x}",
                    psm
                )))
            }
        };

        Ok(Self {
            local,
            remote,
            channel,
            security_level,
            listen,
        })
    }
}

/// An open ATT session.
///
/// `send` hands one complete PDU to the link. Completion of the connect
/// attempt, incoming PDUs and link loss are reported by the event loop.
pub trait AttTransport {
    fn send(&mut self, pdu: &[u8]) -> Result<(), TransportError>;

    fn close(&mut self);
}

/// Opens transports. A synchronous error means the attempt could not even be
/// started.
pub trait TransportConnector {
    fn connect(&mut self, options: &ConnectOptions) -> Result<Box<dyn AttTransport>, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_psm_validation() {
        assert!(ConnectionProfile::LowEnergy.is_valid());
        assert!(ConnectionProfile::BasicRate { psm: 0x001F }.is_valid());
        assert!(ConnectionProfile::BasicRate { psm: 0x1001 }.is_valid());
        assert!(!ConnectionProfile::BasicRate { psm: 0x0002 }.is_valid());
        assert!(!ConnectionProfile::BasicRate { psm: 0x0101 }.is_valid());
    }

    #[test]
    fn test_connect_options_channel() {
        let local = BdAddr::new([1; 6]);
        let remote = BdAddr::new([2; 6]);

        let le = ConnectOptions::new(local, remote, ConnectionProfile::LowEnergy, SecurityLevel::Low, false)
            .unwrap();
        assert_eq!(le.channel, Channel::Cid(ATT_CID));

        let br = ConnectOptions::new(
            local,
            remote,
            ConnectionProfile::BasicRate { psm: 0x001F },
            SecurityLevel::Medium,
            true,
        )
        .unwrap();
        assert_eq!(br.channel, Channel::Psm(0x001F));
        assert!(br.listen);

        assert!(ConnectOptions::new(
            local,
            remote,
            ConnectionProfile::BasicRate { psm: 0x0100 },
            SecurityLevel::Low,
            false
        )
        .is_err());
    }
}
