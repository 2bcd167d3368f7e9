//! Error types for the serial listener
//!
//! Only `ConnectError` ever reaches a caller. The other kinds are produced on
//! the notification path, where they are logged and dispatch carries on.

use std::io;
use thiserror::Error;

/// Failure to bring a connection to the `Open` state
#[derive(Debug, Error)]
pub enum ConnectError {
    /// The configured device identifier does not resolve to a device
    #[error("Serial port not found: {path}")]
    PortNotFound { path: String },

    /// The device exists but could not be acquired exclusively
    #[error("Serial port unavailable: {path} ({reason})")]
    PortUnavailable { path: String, reason: String },
}

impl ConnectError {
    pub(crate) fn unavailable(path: &str, reason: impl Into<String>) -> Self {
        ConnectError::PortUnavailable {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}

/// Malformed input seen while turning bytes into lines
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("invalid UTF-8 sequence of {len} byte(s) at offset {offset}, dropped")]
    InvalidSequence { offset: usize, len: usize },

    #[error("line exceeded {limit} bytes without a terminator, discarded")]
    LineTooLong { limit: usize },
}

/// The line handler failed on a single line
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("line handler failed: {0:#}")]
    Failed(anyhow::Error),

    #[error("line handler panicked: {0}")]
    Panicked(String),
}

/// The device could not be released cleanly during `close()`
#[derive(Debug, Error)]
#[error("Failed to release serial port {path}: {source}")]
pub struct ReleaseError {
    pub path: String,
    #[source]
    pub source: io::Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_error_messages() {
        let err = ConnectError::PortNotFound {
            path: "/dev/ttyACM9".to_string(),
        };
        assert_eq!(err.to_string(), "Serial port not found: /dev/ttyACM9");

        let err = ConnectError::unavailable("/dev/ttyACM0", "device busy");
        assert_eq!(
            err.to_string(),
            "Serial port unavailable: /dev/ttyACM0 (device busy)"
        );
    }

    #[test]
    fn test_handler_error_keeps_context() {
        let source = anyhow::anyhow!("bad value").context("parsing line 3");
        let err = HandlerError::Failed(source);
        assert_eq!(err.to_string(), "line handler failed: parsing line 3: bad value");
    }
}
