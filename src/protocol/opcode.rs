//! Frame opcodes (RFC 6455 Section 5.2).

use crate::error::{Error, Result};

/// The 4-bit opcode in the first byte of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    /// Later frame of a fragmented message.
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    /// Reply to a Ping, or an unsolicited keepalive.
    Pong = 0xA,
}

impl OpCode {
    /// Decode the low nibble of a frame's first byte.
    ///
    /// # Errors
    ///
    /// Returns `Error::ProtocolViolation` for the reserved opcodes 0x3-0x7 and
    /// 0xB-0xF.
    pub fn from_u8(nibble: u8) -> Result<Self> {
        Ok(match nibble & 0x0F {
            0x0 => OpCode::Continuation,
            0x1 => OpCode::Text,
            0x2 => OpCode::Binary,
            0x8 => OpCode::Close,
            0x9 => OpCode::Ping,
            0xA => OpCode::Pong,
            reserved => {
                return Err(Error::ProtocolViolation(format!(
                    "reserved opcode {reserved:#x}"
                )));
            }
        })
    }

    #[inline]
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Close, Ping and Pong: at most 125 bytes and never fragmented.
    #[inline]
    #[must_use]
    pub const fn is_control(self) -> bool {
        (self as u8) & 0x8 != 0
    }

    /// Continuation, Text and Binary.
    #[inline]
    #[must_use]
    pub const fn is_data(self) -> bool {
        !self.is_control()
    }
}

impl TryFrom<u8> for OpCode {
    type Error = Error;

    fn try_from(nibble: u8) -> Result<Self> {
        Self::from_u8(nibble)
    }
}
