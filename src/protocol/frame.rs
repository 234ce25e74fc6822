//! WebSocket frame encoding and decoding (RFC 6455 Section 5.2).
//!
//! Decoding is role-aware: an acceptor only accepts masked frames and an
//! initiator only accepts unmasked ones. Every rule a peer can break on the
//! wire (reserved bits, unknown opcodes, oversized or fragmented control
//! frames, masking direction, configured size limit) is reported as
//! [`Error::ProtocolViolation`] or [`Error::FrameTooLarge`].

use bytes::{BufMut, Bytes, BytesMut};

use crate::connection::Role;
use crate::error::{Error, Result};
use crate::message::CloseInfo;
use crate::protocol::OpCode;
use crate::protocol::mask::apply_mask;

/// Maximum payload size for control frames (RFC 6455).
pub const MAX_CONTROL_FRAME_PAYLOAD: usize = 125;

/// Largest possible header: 2 fixed bytes, 8-byte extended length, 4-byte mask.
pub const MAX_HEADER_LEN: usize = 14;

/// Decoded frame header.
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-------+-+-------------+-------------------------------+
/// |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
/// |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
/// |N|V|V|V|       |S|             |   (if payload len==126/127)   |
/// | |1|2|3|       |K|             |                               |
/// +-+-+-+-+-------+-+-------------+-------------------------------+
/// |                         Masking key (if present)              |
/// +---------------------------------------------------------------+
/// |                     Payload data                              |
/// +---------------------------------------------------------------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Final fragment flag.
    pub fin: bool,
    /// Frame opcode.
    pub opcode: OpCode,
    /// Masking key, present iff the frame came from an initiator.
    pub mask: Option<[u8; 4]>,
    /// Payload length in bytes.
    pub payload_len: usize,
    /// Header length in bytes, including the masking key.
    pub header_len: usize,
}

impl FrameHeader {
    /// Parse and validate a header received by an endpoint playing `role`.
    ///
    /// `max_payload` bounds the payload of any single frame.
    ///
    /// # Errors
    ///
    /// - `Error::IncompleteFrame` if the header is not fully buffered yet
    /// - `Error::ProtocolViolation` for reserved bits, unknown opcodes, control
    ///   frame rules and masking direction
    /// - `Error::FrameTooLarge` if the payload exceeds `max_payload`
    pub fn parse(buf: &[u8], role: Role, max_payload: usize) -> Result<Self> {
        if buf.len() < 2 {
            return Err(Error::IncompleteFrame {
                needed: 2 - buf.len(),
            });
        }

        let byte0 = buf[0];
        let byte1 = buf[1];

        if byte0 & 0x70 != 0 {
            return Err(Error::ProtocolViolation(
                "Reserved bits set without negotiated extension".into(),
            ));
        }
        let fin = byte0 & 0x80 != 0;
        let opcode = OpCode::from_u8(byte0 & 0x0F)?;

        let masked = byte1 & 0x80 != 0;
        if masked != role.expects_masked() {
            return Err(Error::ProtocolViolation(if masked {
                "Frame from acceptor must not be masked".into()
            } else {
                "Frame from initiator must be masked".into()
            }));
        }

        let (payload_len, len_size) = match byte1 & 0x7F {
            len @ 0..=125 => (u64::from(len), 0),
            126 => {
                if buf.len() < 4 {
                    return Err(Error::IncompleteFrame {
                        needed: 4 - buf.len(),
                    });
                }
                (u64::from(u16::from_be_bytes([buf[2], buf[3]])), 2)
            }
            _ => {
                if buf.len() < 10 {
                    return Err(Error::IncompleteFrame {
                        needed: 10 - buf.len(),
                    });
                }
                let mut len = [0u8; 8];
                len.copy_from_slice(&buf[2..10]);
                let len = u64::from_be_bytes(len);
                if len >> 63 != 0 {
                    return Err(Error::ProtocolViolation(
                        "Most significant bit of 64-bit length set".into(),
                    ));
                }
                (len, 8)
            }
        };

        if opcode.is_control() {
            if !fin {
                return Err(Error::ProtocolViolation(
                    "Control frames cannot be fragmented".into(),
                ));
            }
            if payload_len > MAX_CONTROL_FRAME_PAYLOAD as u64 {
                return Err(Error::ProtocolViolation(format!(
                    "Control frame payload too large: {payload_len} bytes (max: 125)"
                )));
            }
        }

        if payload_len > max_payload as u64 {
            return Err(Error::FrameTooLarge {
                size: payload_len,
                max: max_payload,
            });
        }

        let mask_offset = 2 + len_size;
        let header_len = if masked { mask_offset + 4 } else { mask_offset };
        if buf.len() < header_len {
            return Err(Error::IncompleteFrame {
                needed: header_len - buf.len(),
            });
        }
        let mask = masked.then(|| {
            [
                buf[mask_offset],
                buf[mask_offset + 1],
                buf[mask_offset + 2],
                buf[mask_offset + 3],
            ]
        });

        Ok(Self {
            fin,
            opcode,
            mask,
            // bounded by max_payload above
            payload_len: payload_len as usize,
            header_len,
        })
    }

    /// Total bytes occupied on the wire by header and payload.
    #[inline]
    #[must_use]
    pub const fn frame_len(&self) -> usize {
        self.header_len + self.payload_len
    }
}

/// A logical WebSocket frame: FIN flag, opcode and unmasked payload.
///
/// The masking key is a property of the encoding, not of the frame; it is
/// chosen by [`Frame::encode`] and removed by [`Frame::decode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment flag. True if this is the last fragment of a message.
    pub fin: bool,
    /// Frame opcode defining the interpretation of payload data.
    pub opcode: OpCode,
    payload: Bytes,
}

impl Frame {
    /// Create a new frame with the given parameters.
    #[must_use]
    pub fn new(fin: bool, opcode: OpCode, payload: impl Into<Bytes>) -> Self {
        Self {
            fin,
            opcode,
            payload: payload.into(),
        }
    }

    /// Create a close frame carrying `info`.
    #[must_use]
    pub fn close(info: &CloseInfo) -> Self {
        Self::new(true, OpCode::Close, info.to_payload())
    }

    /// Create a ping frame.
    #[must_use]
    pub fn ping(data: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Ping, data)
    }

    /// Create a pong frame.
    #[must_use]
    pub fn pong(data: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Pong, data)
    }

    /// Get the payload bytes.
    #[inline]
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Take ownership of the payload.
    #[must_use]
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Check the control frame rules before sending.
    ///
    /// # Errors
    ///
    /// Returns `Error::ProtocolViolation` if a control frame is fragmented or
    /// carries more than 125 bytes.
    pub fn validate(&self) -> Result<()> {
        if self.opcode.is_control() {
            if !self.fin {
                return Err(Error::ProtocolViolation(
                    "Control frames cannot be fragmented".into(),
                ));
            }
            if self.payload.len() > MAX_CONTROL_FRAME_PAYLOAD {
                return Err(Error::ProtocolViolation(format!(
                    "Control frame payload too large: {} bytes (max: 125)",
                    self.payload.len()
                )));
            }
        }
        Ok(())
    }

    /// Calculate the size needed to encode this frame.
    #[must_use]
    pub fn wire_size(&self, masked: bool) -> usize {
        let payload_len = self.payload.len();
        let extended_len_size = if payload_len <= 125 {
            0
        } else if payload_len <= 0xFFFF {
            2
        } else {
            8
        };
        let mask_size = if masked { 4 } else { 0 };
        2 + extended_len_size + mask_size + payload_len
    }

    /// Append the wire encoding of this frame to `dst`.
    ///
    /// `mask` must be `Some` exactly when the sender is the initiator.
    pub fn encode(&self, mask: Option<[u8; 4]>, dst: &mut BytesMut) {
        let payload_len = self.payload.len();
        dst.reserve(self.wire_size(mask.is_some()));

        let byte0 = self.opcode.as_u8() | if self.fin { 0x80 } else { 0 };
        dst.put_u8(byte0);

        let mask_bit = if mask.is_some() { 0x80 } else { 0 };
        if payload_len <= 125 {
            dst.put_u8(mask_bit | payload_len as u8);
        } else if payload_len <= 0xFFFF {
            dst.put_u8(mask_bit | 126);
            dst.put_u16(payload_len as u16);
        } else {
            dst.put_u8(mask_bit | 127);
            dst.put_u64(payload_len as u64);
        }

        match mask {
            Some(key) => {
                dst.put_slice(&key);
                let start = dst.len();
                dst.put_slice(&self.payload);
                apply_mask(&mut dst[start..], key);
            }
            None => dst.put_slice(&self.payload),
        }
    }

    /// Encode into a fresh buffer.
    #[must_use]
    pub fn to_bytes(&self, mask: Option<[u8; 4]>) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.wire_size(mask.is_some()));
        self.encode(mask, &mut buf);
        buf.freeze()
    }

    /// Decode one frame received by an endpoint playing `role`.
    ///
    /// Returns the frame and the number of bytes consumed.
    ///
    /// # Errors
    ///
    /// See [`FrameHeader::parse`]; additionally `Error::IncompleteFrame` when the
    /// payload is not fully buffered.
    pub fn decode(buf: &[u8], role: Role, max_payload: usize) -> Result<(Self, usize)> {
        let header = FrameHeader::parse(buf, role, max_payload)?;
        let total = header.frame_len();
        if buf.len() < total {
            return Err(Error::IncompleteFrame {
                needed: total - buf.len(),
            });
        }

        let mut payload = buf[header.header_len..total].to_vec();
        if let Some(key) = header.mask {
            apply_mask(&mut payload, key);
        }
        Ok((Self::new(header.fin, header.opcode, payload), total))
    }

    /// Build a frame from a header and its still-masked payload.
    pub(crate) fn from_parts(header: &FrameHeader, mut payload: BytesMut) -> Self {
        if let Some(key) = header.mask {
            apply_mask(&mut payload, key);
        }
        Self::new(header.fin, header.opcode, payload.freeze())
    }
}
