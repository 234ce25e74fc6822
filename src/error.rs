//! Error types for the WebSocket protocol engine.
//!
//! Operations surface the connection-level taxonomy (`ProtocolTimeout`,
//! `RequestAborted`, `ProtocolViolation`, `ContentTypeMismatch`,
//! `BufferTooSmall`, `TransportError`, `InvalidState`). The remaining variants
//! are produced by the codec, handshake and configuration layers.

use thiserror::Error;

use crate::connection::ConnectionState;
use crate::message::ContentType;

/// Result type alias for WebSocket operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during WebSocket operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// An open, close or pong watchdog timer expired.
    #[error("Protocol timeout")]
    ProtocolTimeout,

    /// The connection was aborted.
    #[error("Request aborted")]
    RequestAborted,

    /// Protocol violation detected.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// A fragment's content type disagrees with the message in progress.
    #[error("Content type mismatch: message is {expected}, fragment is {actual}")]
    ContentTypeMismatch {
        /// Content type of the message in progress.
        expected: ContentType,
        /// Content type of the offending fragment.
        actual: ContentType,
    },

    /// The receive buffer cannot hold the message.
    #[error("Buffer too small: need at least {needed} bytes (capacity: {capacity})")]
    BufferTooSmall {
        /// Bytes accumulated when the buffer overflowed.
        needed: usize,
        /// Capacity of the caller's buffer.
        capacity: usize,
    },

    /// The underlying transport failed.
    #[error("Transport error: {0}")]
    TransportError(String),

    /// The operation is not permitted in the connection's current state.
    #[error("Invalid state: {0}")]
    InvalidState(ConnectionState),

    /// The peer closed its sending direction.
    #[error("Connection closed: {0:?}")]
    ConnectionClosed(Option<u16>),

    /// Invalid WebSocket handshake.
    #[error("Invalid handshake: {0}")]
    InvalidHandshake(String),

    /// Handshake exceeds the configured maximum size.
    #[error("Handshake too large: {size} bytes (max: {max})")]
    HandshakeTooLarge {
        /// Bytes read so far.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// A header value contains characters that cannot be sent.
    #[error("Invalid value for header {header}: {reason}")]
    InvalidHeaderValue {
        /// Header name.
        header: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// Incomplete frame data.
    #[error("Incomplete frame: need {needed} more bytes")]
    IncompleteFrame {
        /// Number of additional bytes needed.
        needed: usize,
    },

    /// Frame size exceeds configured maximum.
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge {
        /// Actual frame size.
        size: u64,
        /// Maximum allowed size.
        max: usize,
    },

    /// Message size exceeds configured maximum.
    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge {
        /// Actual message size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Close code that must not appear in a Close frame.
    #[error("Invalid close code: {0}")]
    InvalidCloseCode(u16),

    /// Close reason longer than 123 bytes.
    #[error("Close reason too long: {0} bytes (max: 123)")]
    ReasonTooLong(usize),

    /// Rejected configuration value.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Returns `true` if this error moves a connection to the `Error` state
    /// when it fails an operation.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Error::ProtocolTimeout
                | Error::ProtocolViolation(_)
                | Error::ContentTypeMismatch { .. }
                | Error::TransportError(_)
                | Error::InvalidHandshake(_)
                | Error::HandshakeTooLarge { .. }
        )
    }

    /// Fold a codec-level error into the connection taxonomy.
    pub(crate) fn into_violation(self) -> Self {
        match self {
            Error::TransportError(_)
            | Error::ProtocolViolation(_)
            | Error::ProtocolTimeout
            | Error::RequestAborted => self,
            other => Error::ProtocolViolation(other.to_string()),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::TransportError(err.to_string())
    }
}
