//! ATT (Attribute Protocol) layer
//!
//! PDU codecs and error types used by the attribute client.

pub mod constants;
pub mod error;
pub mod pdu;

pub use constants::*;
pub use error::{AttError, AttErrorCode, AttResult};
pub use pdu::AttPacket;
