//! Error types for adapter operations

use thiserror::Error;

/// Adapter link errors
#[derive(Debug, Error)]
pub enum AdapterError {
    /// I/O failure on the underlying byte stream
    #[error("Transport error: {0}")]
    Transport(String),

    /// Fewer bytes arrived than the protocol requires before the read timed out
    #[error("{op}: short read, expected {expected} byte(s), got {got}")]
    ShortRead {
        op: &'static str,
        expected: usize,
        got: usize,
    },

    /// The adapter sent something the protocol does not allow
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The adapter explicitly reported a failure
    #[error("{op}: adapter reported error {code} ({})", code_description(.code))]
    Device { op: &'static str, code: u8 },

    /// Handshake or identity validation failed while opening the link
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Serial port error
    #[cfg(feature = "serial")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),
}

/// Coarse classification of an [`AdapterError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Short read/write or port failure
    Transport,
    /// Desynchronized or misbehaving adapter
    Protocol,
    /// Adapter-reported failure, carries a code
    Device,
    /// Link could not be established
    Connection,
}

impl AdapterError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            AdapterError::Transport(_) | AdapterError::ShortRead { .. } => ErrorKind::Transport,
            #[cfg(feature = "serial")]
            AdapterError::Serial(_) => ErrorKind::Transport,
            AdapterError::Protocol(_) => ErrorKind::Protocol,
            AdapterError::Device { .. } => ErrorKind::Device,
            AdapterError::Connection(_) => ErrorKind::Connection,
        }
    }

    /// The adapter's error code, if this is a device error
    pub fn device_code(&self) -> Option<u8> {
        match self {
            AdapterError::Device { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Result type for adapter operations
pub type Result<T> = core::result::Result<T, AdapterError>;

impl From<std::io::Error> for AdapterError {
    fn from(e: std::io::Error) -> Self {
        AdapterError::Transport(e.to_string())
    }
}

fn code_description(code: &u8) -> &'static str {
    DeviceErrorCode::describe(*code)
}

/// Error codes reported by the adapter firmware after an `E` status byte
pub struct DeviceErrorCode;

impl DeviceErrorCode {
    pub const DATA_TOO_LONG: u8 = 1;
    pub const NACK_ADDRESS: u8 = 2;
    pub const NACK_DATA: u8 = 3;
    pub const OTHER: u8 = 4;
    pub const TIMEOUT: u8 = 5;
    pub const ADDRESS_OUT_OF_RANGE: u8 = 8;
    pub const DATA_COUNT_OUT_OF_RANGE: u8 = 9;
    pub const EXTRA_COUNT_OUT_OF_RANGE: u8 = 10;
    pub const TOTAL_COUNT_OUT_OF_RANGE: u8 = 11;

    /// Human readable description of an adapter error code
    pub fn describe(code: u8) -> &'static str {
        match code {
            Self::DATA_TOO_LONG => "data too long",
            Self::NACK_ADDRESS => "NACK on address",
            Self::NACK_DATA => "NACK on data",
            Self::OTHER => "other error",
            Self::TIMEOUT => "timeout",
            Self::ADDRESS_OUT_OF_RANGE => "device address out of range",
            Self::DATA_COUNT_OUT_OF_RANGE => "data byte count out of range",
            Self::EXTRA_COUNT_OUT_OF_RANGE => "extra byte count out of range",
            Self::TOTAL_COUNT_OUT_OF_RANGE => "total byte count out of range",
            _ => "unknown",
        }
    }
}
