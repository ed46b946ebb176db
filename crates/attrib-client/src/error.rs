//! Error types for the attribute client
//!
//! `ClientError` is what callers of `AttribClient` see. `TransportError` is
//! what a transport reports while connecting or sending.

use crate::att::AttError;
use thiserror::Error;

/// Errors reported by an ATT transport
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Failed to connect: {0}")]
    ConnectFailed(String),

    #[error("Failed to send PDU: {0}")]
    SendFailed(String),

    #[error("Invalid connection parameters: {0}")]
    InvalidParameters(String),
}

/// Errors returned by client operations
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Invalid arguments")]
    InvalidArguments,

    #[error("Not authorized")]
    NotAuthorized,

    #[error("Operation failed: {0}")]
    Failed(String),

    #[error("Does not exist")]
    DoesNotExist,

    #[error("Already exists")]
    AlreadyExists,

    #[error("Out of memory")]
    OutOfMemory,

    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("ATT error: {0}")]
    Att(#[from] AttError),
}

impl From<TransportError> for ClientError {
    fn from(err: TransportError) -> Self {
        ClientError::Failed(err.to_string())
    }
}

/// Client Result type
pub type ClientResult<T> = Result<T, ClientError>;
