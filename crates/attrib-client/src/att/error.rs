//! Error handling for the ATT protocol
use super::constants::*;
use thiserror::Error;

/// ATT error codes carried in an Error Response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttErrorCode {
    InvalidHandle,
    ReadNotPermitted,
    WriteNotPermitted,
    InvalidPdu,
    InsufficientAuthentication,
    RequestNotSupported,
    InvalidOffset,
    InsufficientAuthorization,
    PrepareQueueFull,
    /// Terminates every paged discovery sub-procedure
    AttributeNotFound,
    AttributeNotLong,
    InsufficientEncryptionKeySize,
    InvalidAttributeValueLength,
    Unlikely,
    InsufficientEncryption,
    UnsupportedGroupType,
    InsufficientResources,
    ApplicationError(u8),
    Unknown(u8),
}

impl From<u8> for AttErrorCode {
    fn from(code: u8) -> Self {
        match code {
            ATT_ERROR_INVALID_HANDLE => AttErrorCode::InvalidHandle,
            ATT_ERROR_READ_NOT_PERMITTED => AttErrorCode::ReadNotPermitted,
            ATT_ERROR_WRITE_NOT_PERMITTED => AttErrorCode::WriteNotPermitted,
            ATT_ERROR_INVALID_PDU => AttErrorCode::InvalidPdu,
            ATT_ERROR_INSUFFICIENT_AUTHENTICATION => AttErrorCode::InsufficientAuthentication,
            ATT_ERROR_REQUEST_NOT_SUPPORTED => AttErrorCode::RequestNotSupported,
            ATT_ERROR_INVALID_OFFSET => AttErrorCode::InvalidOffset,
            ATT_ERROR_INSUFFICIENT_AUTHORIZATION => AttErrorCode::InsufficientAuthorization,
            ATT_ERROR_PREPARE_QUEUE_FULL => AttErrorCode::PrepareQueueFull,
            ATT_ERROR_ATTRIBUTE_NOT_FOUND => AttErrorCode::AttributeNotFound,
            ATT_ERROR_ATTRIBUTE_NOT_LONG => AttErrorCode::AttributeNotLong,
            ATT_ERROR_INSUFFICIENT_ENCRYPTION_KEY_SIZE => {
                AttErrorCode::InsufficientEncryptionKeySize
            }
            ATT_ERROR_INVALID_ATTRIBUTE_VALUE_LENGTH => AttErrorCode::InvalidAttributeValueLength,
            ATT_ERROR_UNLIKELY => AttErrorCode::Unlikely,
            ATT_ERROR_INSUFFICIENT_ENCRYPTION => AttErrorCode::InsufficientEncryption,
            ATT_ERROR_UNSUPPORTED_GROUP_TYPE => AttErrorCode::UnsupportedGroupType,
            ATT_ERROR_INSUFFICIENT_RESOURCES => AttErrorCode::InsufficientResources,
            c if (ATT_ERROR_APPLICATION_ERROR_START..=ATT_ERROR_APPLICATION_ERROR_END)
                .contains(&c) =>
            {
                AttErrorCode::ApplicationError(c)
            }
            _ => AttErrorCode::Unknown(code),
        }
    }
}

/// Errors observed by a pending query
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttError {
    #[error("ATT error: {0:?} on handle 0x{1:04x}")]
    Protocol(AttErrorCode, u16),

    #[error("Invalid PDU")]
    InvalidPdu,

    #[error("Connection gone")]
    ConnectionGone,

    #[error("Transport error: {0}")]
    Transport(String),
}

impl AttError {
    /// Whether this is the "Attribute Not Found" error response that ends a
    /// discovery sub-procedure
    pub fn is_attribute_not_found(&self) -> bool {
        matches!(self, AttError::Protocol(AttErrorCode::AttributeNotFound, _))
    }
}

/// ATT Result type
pub type AttResult<T> = Result<T, AttError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_conversion() {
        assert_eq!(AttErrorCode::from(0x0A), AttErrorCode::AttributeNotFound);
        assert_eq!(AttErrorCode::from(0x85), AttErrorCode::ApplicationError(0x85));
        assert_eq!(AttErrorCode::from(0x42), AttErrorCode::Unknown(0x42));

        assert!(AttError::Protocol(AttErrorCode::AttributeNotFound, 1).is_attribute_not_found());
        assert!(!AttError::Protocol(AttErrorCode::ReadNotPermitted, 1).is_attribute_not_found());
        assert!(!AttError::ConnectionGone.is_attribute_not_found());
    }
}
