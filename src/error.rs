//! Error types for the IEC 60870-5-104 stack.

use thiserror::Error;

/// Result type alias for IEC 104 operations.
pub type Result<T> = std::result::Result<T, Iec104Error>;

/// IEC 60870-5-104 error types.
#[derive(Debug, Error)]
pub enum Iec104Error {
    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Not connected to remote
    #[error("Not connected")]
    NotConnected,

    /// Connection timeout (t0)
    #[error("Connection timeout")]
    ConnectionTimeout,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Protocol violation by the peer
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Malformed or truncated message
    #[error("Parsing error: {0}")]
    Parsing(String),

    /// Unknown type identifier
    #[error("Unknown type ID: {0}")]
    UnknownTypeId(u8),

    /// Unknown cause of transmission
    #[error("Unknown COT: {0}")]
    UnknownCot(u8),

    /// Sequence number mismatch
    #[error("Sequence number mismatch: expected {expected}, got {actual}")]
    SequenceMismatch { expected: u16, actual: u16 },

    /// T1 timeout (send or test confirmation)
    #[error("T1 timeout: no confirmation received")]
    T1Timeout,

    /// T3 timeout (test frame)
    #[error("T3 timeout: connection test failed")]
    T3Timeout,

    /// Too many unconfirmed frames
    #[error("Too many unconfirmed frames (K={0})")]
    TooManyUnconfirmed(u16),

    /// Value outside of the legal range of an information element
    #[error("Value out of range: {0}")]
    Range(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Channel closed
    #[error("Channel closed")]
    ChannelClosed,
}

impl Iec104Error {
    /// Create a protocol error with a message.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a parsing error.
    pub fn parsing(msg: impl Into<String>) -> Self {
        Self::Parsing(msg.into())
    }

    /// Create a range error.
    pub fn range(msg: impl Into<String>) -> Self {
        Self::Range(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Check if this error indicates a connection problem.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection(_)
                | Self::NotConnected
                | Self::ConnectionTimeout
                | Self::Io(_)
                | Self::ChannelClosed
        )
    }

    /// Check if this error is one of the protocol timeouts.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::ConnectionTimeout | Self::T1Timeout | Self::T3Timeout
        )
    }
}
