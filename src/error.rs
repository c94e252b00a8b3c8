//! Error types for hublink.

use std::fmt;
use std::io;

use thiserror::Error;

/// Result type alias for hublink operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for hublink.
#[derive(Error, Debug)]
pub enum Error {
    // Command validation
    #[error("port {0:#04x} does not host a motor")]
    PortNotMotor(u8),

    #[error("port {0:#04x} has no attached device")]
    PortNotFound(u8),

    // Link errors
    #[error("transport lost: {0}")]
    TransportLost(String),

    #[error("reconnection exhausted after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    #[error("operation cancelled")]
    Cancelled,

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    // Protocol errors
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    // Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Frame decoding errors.
///
/// Truncation is local and non-fatal: the decoder still yields the partial
/// message and reports which field ran past the end of the buffer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("truncated {field}: need {needed} bytes, {available} available")]
    Truncated {
        field: &'static str,
        needed: usize,
        available: usize,
    },

    #[error("length byte declares {declared} bytes, frame carries {actual}")]
    LengthMismatch { declared: usize, actual: usize },
}

impl DecodeError {
    /// Truncation of the whole frame (shorter than the 3-byte header).
    pub fn short_frame(available: usize) -> Self {
        Self::Truncated {
            field: "header",
            needed: crate::protocol::MIN_FRAME_LEN,
            available,
        }
    }
}

/// Outbound protocol errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("empty payload")]
    EmptyPayload,

    #[error("invalid frame length: declared {declared}, actual {actual}")]
    InvalidLength { declared: usize, actual: usize },
}

/// Transport layer errors.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("no adapter available: {0}")]
    NoAdapter(String),

    #[error("scan failed: {0}")]
    ScanFailed(String),

    #[error("no hub found")]
    NoHubFound,

    #[error("connect to {device} failed: {reason}")]
    ConnectFailed { device: String, reason: String },

    #[error("subscribe failed: {0}")]
    SubscribeFailed(String),

    #[error("write failed: {0}")]
    WriteFailed(String),

    #[error("not connected")]
    NotConnected,

    #[error("write timed out")]
    Timeout,

    #[cfg(feature = "ble")]
    #[error("bluetooth error: {0}")]
    Ble(#[from] btleplug::Error),
}

/// Coarse classification of an [`Error`], cheap to copy and store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Truncated,
    PortNotMotor,
    PortNotFound,
    TransportLost,
    ReconnectExhausted,
    Cancelled,
    Transport,
    Protocol,
    Config,
    Io,
    Other,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Truncated => "truncated",
            Self::PortNotMotor => "port-not-motor",
            Self::PortNotFound => "port-not-found",
            Self::TransportLost => "transport-lost",
            Self::ReconnectExhausted => "reconnect-exhausted",
            Self::Cancelled => "cancelled",
            Self::Transport => "transport",
            Self::Protocol => "protocol",
            Self::Config => "config",
            Self::Io => "io",
            Self::Other => "other",
        };
        f.write_str(name)
    }
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::PortNotMotor(_) => ErrorKind::PortNotMotor,
            Error::PortNotFound(_) => ErrorKind::PortNotFound,
            Error::TransportLost(_) | Error::Transport(TransportError::NotConnected) => {
                ErrorKind::TransportLost
            }
            Error::ReconnectExhausted { .. } => ErrorKind::ReconnectExhausted,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Transport(_) => ErrorKind::Transport,
            Error::Decode(DecodeError::Truncated { .. }) => ErrorKind::Truncated,
            Error::Decode(_) | Error::Protocol(_) => ErrorKind::Protocol,
            Error::Config(_) | Error::InvalidConfig(_) => ErrorKind::Config,
            Error::Io(_) => ErrorKind::Io,
            Error::Other(_) => ErrorKind::Other,
        }
    }

    /// Check if error indicates the link should be re-established.
    pub fn should_reconnect(&self) -> bool {
        matches!(
            self,
            Error::TransportLost(_)
                | Error::Transport(
                    TransportError::NotConnected
                        | TransportError::WriteFailed(_)
                        | TransportError::SubscribeFailed(_)
                        | TransportError::Timeout
                )
        )
    }

    /// Check if error ends supervision for good.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Error::ReconnectExhausted { .. } | Error::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(Error::PortNotMotor(0x32).kind(), ErrorKind::PortNotMotor);
        assert_eq!(Error::PortNotFound(0x32).kind(), ErrorKind::PortNotFound);
        assert_eq!(
            Error::Transport(TransportError::NotConnected).kind(),
            ErrorKind::TransportLost
        );
        assert_eq!(
            Error::Decode(DecodeError::short_frame(2)).kind(),
            ErrorKind::Truncated
        );
        assert_eq!(
            Error::ReconnectExhausted { attempts: 3 }.kind(),
            ErrorKind::ReconnectExhausted
        );
    }

    #[test]
    fn test_reconnect_and_terminal() {
        assert!(Error::TransportLost("gone".into()).should_reconnect());
        assert!(!Error::PortNotMotor(1).should_reconnect());
        assert!(Error::Cancelled.is_terminal());
        assert!(!Error::TransportLost("gone".into()).is_terminal());
    }

    #[test]
    fn test_display() {
        let err = Error::PortNotMotor(0x32);
        assert_eq!(err.to_string(), "port 0x32 does not host a motor");
        assert_eq!(ErrorKind::TransportLost.to_string(), "transport-lost");
    }
}
