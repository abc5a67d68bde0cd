//! Error types for flipdeploy.

use std::io;
use thiserror::Error;

/// Result type for flipdeploy operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for flipdeploy operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The serial port does not exist or is held by another process.
    #[error("Port {port} unavailable: {reason}")]
    PortUnavailable {
        /// Port path that failed to open.
        port: String,
        /// Underlying reason reported by the OS.
        reason: String,
    },

    /// Auto-discovery found no port that could be opened.
    #[error("No Flipper device found")]
    NoDeviceFound,

    /// Communication timeout.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The device answered with an unexpected response shape.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// The device echoed an explicit error.
    #[error("Device error for {path} at offset {offset}: {message}")]
    DeviceReported {
        /// Remote path the command targeted.
        path: String,
        /// Byte offset within the payload (0 for non-transfer commands).
        offset: usize,
        /// Error text as printed by the device.
        message: String,
    },

    /// A file transfer failed after its retry was exhausted.
    #[error("Transfer of {path} failed at offset {offset}: {source}")]
    TransferFailed {
        /// Remote destination path.
        path: String,
        /// Offset of the chunk that failed.
        offset: usize,
        /// Failure of the final attempt.
        #[source]
        source: Box<Error>,
    },

    /// Remote path does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Command text that the device CLI cannot carry (control characters, quotes).
    #[error("Invalid command text: {0:?}")]
    InvalidCommand(String),

    /// A command was issued after the connection was closed.
    #[error("Connection is closed")]
    ConnectionClosed,

    /// The embedding application requested interruption.
    #[error("Operation cancelled")]
    Cancelled,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether a chunk step failing with this error may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::DeviceReported { .. })
    }

    /// Suggested user action for connection-level failures.
    pub fn remediation_hint(&self) -> Option<&'static str> {
        match self {
            Self::PortUnavailable { .. } => Some(
                "Close any other program holding the port (qFlipper, a serial monitor, \
                 another flipdeploy run), check the USB cable and make sure the device \
                 is unlocked.",
            ),
            Self::NoDeviceFound => {
                Some("Connect the device via USB and unlock it, or pass --port explicitly.")
            },
            _ => None,
        }
    }
}
