//! Error types for m5link.

use std::io;
use thiserror::Error;

/// Result type for m5link operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for m5link operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (file operations, console plumbing).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The transport could not be opened.
    #[error("Failed to open {port}: {reason}")]
    Open {
        /// Port name/path that failed to open.
        port: String,
        /// Underlying failure description.
        reason: String,
    },

    /// Writing a request or draining the transport failed.
    #[error("Write error: {0}")]
    Write(#[source] io::Error),

    /// The transport reported an error while a reply was awaited.
    #[error("Transport error: {0}")]
    Transport(#[source] io::Error),

    /// The device answered with a complete frame carrying a non-zero status.
    #[error("Communication error (device status {status:#04x})")]
    Device {
        /// Status byte reported by the device.
        status: u8,
    },

    /// A command was sent while another one was still awaiting its reply.
    #[error("Connection busy: a request is already awaiting its reply")]
    Busy,

    /// The connection has been closed.
    #[error("Connection is closed")]
    NotConnected,

    /// Communication timeout.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// No suitable device endpoint was found.
    #[error("No serial device found")]
    DeviceNotFound,

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Unsupported operation on this platform.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether the error leaves the connection usable for the next request.
    pub fn is_request_local(&self) -> bool {
        matches!(
            self,
            Self::Device { .. } | Self::Write(_) | Self::Timeout(_) | Self::Busy
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_error_message_carries_status() {
        let err = Error::Device { status: 0x03 };
        assert_eq!(err.to_string(), "Communication error (device status 0x03)");
    }

    #[test]
    fn test_request_local_classification() {
        assert!(Error::Device { status: 1 }.is_request_local());
        assert!(Error::Busy.is_request_local());
        assert!(!Error::NotConnected.is_request_local());
        assert!(
            !Error::Transport(io::Error::new(io::ErrorKind::BrokenPipe, "gone")).is_request_local()
        );
    }
}
