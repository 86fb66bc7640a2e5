//! Error types for the IEC 60870-5-104 outstation.

use thiserror::Error;

/// Result type alias for IEC 104 operations.
pub type Result<T> = std::result::Result<T, Iec104Error>;

/// IEC 60870-5-104 outstation error types.
#[derive(Debug, Error)]
pub enum Iec104Error {
    /// Malformed APCI: bad length or invalid control-octet combination
    #[error("Frame syntax error: {0}")]
    FrameSyntax(String),

    /// Invalid ASDU
    #[error("Invalid ASDU: {0}")]
    InvalidAsdu(String),

    /// Unknown type identifier
    #[error("Unknown type ID: {0}")]
    UnknownTypeId(u8),

    /// Unknown cause of transmission
    #[error("Unknown COT: {0}")]
    UnknownCot(u8),

    /// Inbound I-frame carried an unexpected send sequence number
    #[error("Sequence number mismatch: expected {expected}, got {actual}")]
    SequenceMismatch { expected: u16, actual: u16 },

    /// No register configured at the addressed IOA
    #[error("Unknown information object address: {0}")]
    UnknownObjectAddress(u32),

    /// Register category does not match the command type
    #[error("Type mismatch at IOA {ioa}: register category {actual}, command type {expected}")]
    TypeMismatch { ioa: u32, expected: u8, actual: u8 },

    /// T1 expired while waiting for the peer to acknowledge
    #[error("T1 timeout: no acknowledgement received")]
    AckTimeout,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Peer closed the stream
    #[error("Connection closed by peer")]
    ConnectionClosed,

    /// Codec error
    #[error("Codec error: {0}")]
    Codec(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Register table construction or access error
    #[error("Register error: {0}")]
    Register(String),
}

impl Iec104Error {
    /// Create a frame syntax error.
    pub fn frame_syntax(msg: impl Into<String>) -> Self {
        Self::FrameSyntax(msg.into())
    }

    /// Create an invalid ASDU error.
    pub fn invalid_asdu(msg: impl Into<String>) -> Self {
        Self::InvalidAsdu(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a register error.
    pub fn register(msg: impl Into<String>) -> Self {
        Self::Register(msg.into())
    }

    /// Check if this error must tear the connection down.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::SequenceMismatch { .. } | Self::AckTimeout | Self::Io(_) | Self::ConnectionClosed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Iec104Error::AckTimeout;
        assert_eq!(err.to_string(), "T1 timeout: no acknowledgement received");

        let err = Iec104Error::UnknownTypeId(255);
        assert_eq!(err.to_string(), "Unknown type ID: 255");

        let err = Iec104Error::SequenceMismatch {
            expected: 10,
            actual: 14,
        };
        assert_eq!(
            err.to_string(),
            "Sequence number mismatch: expected 10, got 14"
        );

        let err = Iec104Error::TypeMismatch {
            ioa: 5121,
            expected: 45,
            actual: 46,
        };
        assert_eq!(
            err.to_string(),
            "Type mismatch at IOA 5121: register category 46, command type 45"
        );
    }

    #[test]
    fn test_is_fatal() {
        assert!(Iec104Error::AckTimeout.is_fatal());
        assert!(Iec104Error::ConnectionClosed.is_fatal());
        assert!(Iec104Error::SequenceMismatch {
            expected: 0,
            actual: 2
        }
        .is_fatal());
        assert!(!Iec104Error::frame_syntax("bad U-frame").is_fatal());
        assert!(!Iec104Error::UnknownObjectAddress(1).is_fatal());
    }
}
