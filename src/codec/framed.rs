use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::connection::Role;
use crate::error::{Error, Result};
use crate::protocol::frame::FrameHeader;
use crate::protocol::handshake::read_http_head;
use crate::protocol::mask::MaskGenerator;
use crate::protocol::Frame;

/// Reads frames off the read half of a transport.
///
/// `read_frame` is cancel-safe: bytes are only ever appended to the internal
/// buffer by a completed read, and a frame is only split off once it is whole.
pub struct FrameReader<R> {
    io: R,
    read_buf: BytesMut,
    role: Role,
    max_frame_size: usize,
    read_size: usize,
}

impl<R> FrameReader<R> {
    /// Create a reader for an endpoint playing `role`.
    #[must_use]
    pub fn new(io: R, role: Role, max_frame_size: usize, read_size: usize) -> Self {
        Self {
            io,
            read_buf: BytesMut::with_capacity(read_size),
            role,
            max_frame_size,
            read_size: read_size.max(1),
        }
    }

    /// Decode one frame from already buffered bytes, if a whole one is there.
    ///
    /// # Errors
    ///
    /// Any header validation error from [`FrameHeader::parse`] except
    /// `IncompleteFrame`.
    pub fn try_decode(&mut self) -> Result<Option<Frame>> {
        let header = match FrameHeader::parse(&self.read_buf, self.role, self.max_frame_size) {
            Ok(header) => header,
            Err(Error::IncompleteFrame { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };
        if self.read_buf.len() < header.frame_len() {
            self.read_buf
                .reserve(header.frame_len() - self.read_buf.len());
            return Ok(None);
        }
        let _ = self.read_buf.split_to(header.header_len);
        let payload = self.read_buf.split_to(header.payload_len);
        Ok(Some(Frame::from_parts(&header, payload)))
    }
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Read the HTTP upgrade head. Frames the peer sent right behind it stay
    /// buffered for [`FrameReader::read_frame`].
    ///
    /// # Errors
    ///
    /// See [`read_http_head`].
    pub async fn read_head(&mut self, limit: usize) -> Result<BytesMut> {
        read_http_head(&mut self.io, &mut self.read_buf, limit).await
    }

    /// Read the next frame. `Ok(None)` on a clean end of stream between frames.
    ///
    /// # Errors
    ///
    /// - Header validation errors (see [`FrameReader::try_decode`])
    /// - `Error::TransportError` on I/O failure or end of stream inside a frame
    pub async fn read_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            if let Some(frame) = self.try_decode()? {
                return Ok(Some(frame));
            }

            self.read_buf.reserve(self.read_size);
            let mut limited = (&mut self.io).take(self.read_size as u64);
            let n = limited.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                if self.read_buf.is_empty() {
                    return Ok(None);
                }
                return Err(Error::TransportError(format!(
                    "connection closed with {} bytes of a partial frame buffered",
                    self.read_buf.len()
                )));
            }
        }
    }
}

/// Encodes frames for the sending role, choosing masking keys as needed.
#[derive(Debug)]
pub struct FrameEncoder {
    role: Role,
    masks: MaskGenerator,
}

impl FrameEncoder {
    #[must_use]
    pub fn new(role: Role) -> Self {
        Self {
            role,
            masks: MaskGenerator::new(),
        }
    }

    /// Wire bytes for `frame`, masked iff this endpoint is the initiator.
    pub fn encode(&mut self, frame: &Frame) -> Bytes {
        let mask = self.role.must_mask().then(|| self.masks.next_key());
        frame.to_bytes(mask)
    }
}
