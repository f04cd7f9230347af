//! Error types for topicrelay.

use std::io;

/// Result type alias for topicrelay.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for topicrelay operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Record shorter than its fixed size.
    #[error("incomplete record: need {needed} more bytes")]
    Incomplete { needed: usize },

    /// Unknown operation code in a TCP record.
    #[error("invalid op code: {0}")]
    InvalidOpCode(u8),

    /// Unknown data type tag in a UDP record.
    #[error("invalid data type: {0}")]
    InvalidDataType(u8),

    /// String does not fit its fixed-width field.
    #[error("{field} too long: {len} bytes, max {max}")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },

    /// Malformed subscription pattern.
    #[error("invalid pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: &'static str },

    /// Connection refused by broker.
    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    /// Connection closed by peer.
    #[error("connection closed")]
    ConnectionClosed,

    /// Unexpected packet received.
    #[error("unexpected packet: expected {expected}, got {got}")]
    UnexpectedPacket { expected: String, got: String },

    /// Timeout error.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Invalid configuration.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Whether this error means the peer is gone rather than misbehaving.
    pub fn is_disconnect(&self) -> bool {
        match self {
            Error::ConnectionClosed => true,
            Error::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}
