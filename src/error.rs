//! Error types for the Robofocus driver

use ascom_alpaca::{ASCOMError, ASCOMErrorCode};

/// Errors that can occur when interacting with the Robofocus focuser
#[derive(Debug, thiserror::Error)]
pub enum RobofocusError {
    #[error("Not connected to Robofocus")]
    NotConnected,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Serial port error: {0}")]
    SerialPort(String),

    #[error("Serial timeout: {0}")]
    SerialTimeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Checksum mismatch: expected {expected:#04x}, got {got:#04x}")]
    ChecksumMismatch { expected: u8, got: u8 },

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Driver error: {0}")]
    DriverError(String),
}

impl RobofocusError {
    /// Convert this error into the Alpaca error taxonomy.
    ///
    /// `NotConnected` -> 1031, `InvalidValue` -> 1026, `InvalidOperation` -> 1024,
    /// everything else (protocol/serial/IO failures) -> 1280 (`DriverError`).
    pub fn to_ascom_error(self) -> ASCOMError {
        match self {
            RobofocusError::NotConnected => {
                ASCOMError::new(ASCOMErrorCode::NOT_CONNECTED, self.to_string())
            }
            RobofocusError::InvalidValue(_) => {
                ASCOMError::new(ASCOMErrorCode::INVALID_VALUE, self.to_string())
            }
            RobofocusError::InvalidOperation(_) => {
                ASCOMError::new(ASCOMErrorCode::INVALID_OPERATION, self.to_string())
            }
            // Protocol/serial/IO failures all surface as the generic driver
            // error (1280); none of them are retryable by the time they
            // reach this boundary.
            _ => ASCOMError::unspecified(self.to_string()),
        }
    }
}

/// Result type alias for Robofocus operations
pub type Result<T> = std::result::Result<T, RobofocusError>;
