// Copyright (c) 2023 CoolBitX Technology Ltd.

use coolwallet_apdu::{ApduError, StatusWord};
use tokio::time::error::Elapsed;

/// CoolWallet API Error Type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Command does not begin with the expected packet id / length prefix
    #[error("Malformed command frame")]
    MalformedCommand,

    /// Device connection lost
    #[error("Device disconnected")]
    DeviceDisconnected,

    /// Request timeout
    #[error("Timeout waiting for device response")]
    Timeout,

    /// HTTP bridge error
    #[error("HTTP bridge error: {0}")]
    Http(String),

    /// Invalid hex in command, payload or response
    #[error("Invalid hex encoding")]
    Hex(#[from] hex::FromHexError),

    /// APDU encoding / decoding error
    #[error("APDU error: {0}")]
    Apdu(ApduError),

    /// Secure element returned a non-success status
    #[error("Command {ins:02x} failed with status {status}")]
    Status { status: StatusWord, ins: u8 },

    /// User declined the operation on-device
    #[error("Operation canceled by the user")]
    OperationCanceled,

    /// Request cancelled by the caller
    #[error("Request cancelled")]
    Cancelled,

    /// Timeout waiting for user approval
    #[error("Timeout waiting for user interaction")]
    UserTimeout,

    /// Signature components violate strict DER rules
    #[error("Invalid signature encoding: {0}")]
    InvalidSignatureEncoding(&'static str),

    /// No recovery parameter matches the expected public key
    #[error("Signature recovery failed")]
    SignatureRecoveryFailed,

    /// Signature decryption failed
    #[error("Signature decryption failed")]
    Decrypt,

    /// Invalid public key supplied for recovery
    #[error("Invalid public key")]
    InvalidKey,

    /// Unsupported request configuration, rejected prior to device I/O
    #[error("Unsupported configuration: {0}")]
    Unsupported(&'static str),

    /// Unexpected APDU response
    #[error("Unexpected APDU response")]
    UnexpectedResponse,
}

impl From<ApduError> for Error {
    fn from(e: ApduError) -> Self {
        match e {
            ApduError::MalformedCommand => Error::MalformedCommand,
            _ => Error::Apdu(e),
        }
    }
}

impl From<Elapsed> for Error {
    fn from(_: Elapsed) -> Self {
        Error::Timeout
    }
}

#[cfg(feature = "transport_bridge")]
impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout
        } else if e.is_connect() {
            Error::DeviceDisconnected
        } else {
            Error::Http(e.to_string())
        }
    }
}
