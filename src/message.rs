//! Content types, close codes and close information as defined in RFC 6455.

use crate::error::{Error, Result};
use crate::protocol::OpCode;

/// Maximum length of a close reason in bytes (125 minus the 2-byte status code).
pub const MAX_CLOSE_REASON: usize = 123;

/// Content type of a data message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentType {
    /// UTF-8 text.
    Text,
    /// Arbitrary bytes.
    Binary,
}

impl ContentType {
    /// The opcode that starts a message of this type.
    #[inline]
    #[must_use]
    pub const fn opcode(self) -> OpCode {
        match self {
            ContentType::Text => OpCode::Text,
            ContentType::Binary => OpCode::Binary,
        }
    }

    /// The content type started by `opcode`, if it is a Text or Binary opcode.
    #[inline]
    #[must_use]
    pub const fn from_opcode(opcode: OpCode) -> Option<Self> {
        match opcode {
            OpCode::Text => Some(ContentType::Text),
            OpCode::Binary => Some(ContentType::Binary),
            _ => None,
        }
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContentType::Text => write!(f, "Text"),
            ContentType::Binary => write!(f, "Binary"),
        }
    }
}

/// WebSocket close status code per RFC 6455 Section 7.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum CloseCode {
    /// Normal closure (1000). The connection successfully completed.
    #[default]
    Normal,
    /// Going away (1001). Endpoint is going away (e.g., server shutdown).
    GoingAway,
    /// Protocol error (1002). Endpoint received a malformed frame.
    ProtocolError,
    /// Unsupported data (1003). Endpoint received data type it cannot handle.
    UnsupportedData,
    /// Invalid payload (1007). Endpoint received inconsistent message data.
    InvalidPayload,
    /// Policy violation (1008). Generic status when no better code applies.
    PolicyViolation,
    /// Message too big (1009).
    MessageTooBig,
    /// Mandatory extension (1010). Initiator expected an extension to be negotiated.
    MandatoryExtension,
    /// Internal error (1011). Acceptor encountered an unexpected condition.
    InternalError,
    /// Any other code (1012-1014 registered, 3000-4999 for applications).
    Other(u16),
}

impl CloseCode {
    /// Create a `CloseCode` from its numeric value.
    #[must_use]
    pub const fn from_u16(code: u16) -> Self {
        match code {
            1000 => CloseCode::Normal,
            1001 => CloseCode::GoingAway,
            1002 => CloseCode::ProtocolError,
            1003 => CloseCode::UnsupportedData,
            1007 => CloseCode::InvalidPayload,
            1008 => CloseCode::PolicyViolation,
            1009 => CloseCode::MessageTooBig,
            1010 => CloseCode::MandatoryExtension,
            1011 => CloseCode::InternalError,
            other => CloseCode::Other(other),
        }
    }

    /// Get the numeric value of this close code.
    #[must_use]
    pub const fn as_u16(&self) -> u16 {
        match self {
            CloseCode::Normal => 1000,
            CloseCode::GoingAway => 1001,
            CloseCode::ProtocolError => 1002,
            CloseCode::UnsupportedData => 1003,
            CloseCode::InvalidPayload => 1007,
            CloseCode::PolicyViolation => 1008,
            CloseCode::MessageTooBig => 1009,
            CloseCode::MandatoryExtension => 1010,
            CloseCode::InternalError => 1011,
            CloseCode::Other(code) => *code,
        }
    }

    /// Check if this close code may be sent in a Close frame.
    ///
    /// Valid codes are 1000-1003, 1007-1014 and 3000-4999.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        let code = self.as_u16();
        matches!(code, 1000..=1003 | 1007..=1014 | 3000..=4999)
    }

    /// Check if this close code is reserved and MUST NOT be sent in a Close frame
    /// (1004, 1005, 1006 and 1015).
    #[must_use]
    pub const fn is_reserved(&self) -> bool {
        let code = self.as_u16();
        matches!(code, 1004..=1006 | 1015)
    }
}

impl std::fmt::Display for CloseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_u16())
    }
}

/// Which side sent the first Close frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseInitiator {
    /// This endpoint.
    Local,
    /// The peer.
    Remote,
}

/// Status carried by a Close frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    /// Status code; `None` when the Close frame had an empty payload.
    pub code: Option<CloseCode>,
    /// Reason text (UTF-8, at most 123 bytes).
    pub reason: String,
    /// Side that produced this Close frame.
    pub initiator: CloseInitiator,
}

impl CloseInfo {
    /// Build the status for a locally sent Close frame.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidCloseCode` if `code` is reserved or outside the registry
    /// - `Error::ReasonTooLong` if `reason` exceeds 123 bytes
    pub fn local(code: CloseCode, reason: impl Into<String>) -> Result<Self> {
        if !code.is_valid() {
            return Err(Error::InvalidCloseCode(code.as_u16()));
        }
        let reason = reason.into();
        if reason.len() > MAX_CLOSE_REASON {
            return Err(Error::ReasonTooLong(reason.len()));
        }
        Ok(Self {
            code: Some(code),
            reason,
            initiator: CloseInitiator::Local,
        })
    }

    /// Parse the payload of a Close frame received from the peer.
    ///
    /// # Errors
    ///
    /// Returns `Error::ProtocolViolation` for a 1-byte payload, a code that may not
    /// appear on the wire, or a reason that is not valid UTF-8.
    pub fn parse_remote(payload: &[u8]) -> Result<Self> {
        match payload.len() {
            0 => Ok(Self {
                code: None,
                reason: String::new(),
                initiator: CloseInitiator::Remote,
            }),
            1 => Err(Error::ProtocolViolation(
                "Close frame payload of 1 byte".into(),
            )),
            _ => {
                let code = CloseCode::from_u16(u16::from_be_bytes([payload[0], payload[1]]));
                if !code.is_valid() {
                    return Err(Error::ProtocolViolation(format!(
                        "Invalid close code {code}"
                    )));
                }
                let reason = std::str::from_utf8(&payload[2..]).map_err(|_| {
                    Error::ProtocolViolation("Close reason is not valid UTF-8".into())
                })?;
                Ok(Self {
                    code: Some(code),
                    reason: reason.to_owned(),
                    initiator: CloseInitiator::Remote,
                })
            }
        }
    }

    /// Encode as a Close frame payload.
    #[must_use]
    pub fn to_payload(&self) -> Vec<u8> {
        match self.code {
            Some(code) => {
                let mut data = code.as_u16().to_be_bytes().to_vec();
                data.extend_from_slice(self.reason.as_bytes());
                data
            }
            None => Vec::new(),
        }
    }
}
