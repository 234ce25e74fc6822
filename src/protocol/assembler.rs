//! Inbound message sequencing and delivery (RFC 6455 Section 5.4).
//!
//! [`MessageAssembler`] checks that data frames arrive as well-formed messages
//! (a Text or Binary frame, then Continuation frames up to FIN) and queues each
//! frame's payload, stamped with its message's content type, until the
//! application receives it. [`MessageCollector`] drains that queue into one
//! complete message for `ReceiveMessage`.

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::message::ContentType;
use crate::protocol::{Frame, OpCode};

/// One data frame's payload, ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFragment {
    /// Payload bytes.
    pub data: Bytes,
    /// Whether this is the last fragment of its message.
    pub fin: bool,
    /// Content type of the message this fragment belongs to.
    pub content_type: ContentType,
}

/// Sequences inbound data frames and buffers them for delivery.
#[derive(Debug)]
pub struct MessageAssembler {
    /// Content type of the message currently arriving.
    current: Option<ContentType>,
    message_size: usize,
    max_message_size: usize,
    queue: VecDeque<InboundFragment>,
    buffered: usize,
    /// Drop queued fragments through the next FIN.
    discarding: bool,
}

impl MessageAssembler {
    /// Create an assembler rejecting messages over `max_message_size` bytes.
    #[must_use]
    pub fn new(max_message_size: usize) -> Self {
        Self {
            current: None,
            message_size: 0,
            max_message_size,
            queue: VecDeque::new(),
            buffered: 0,
            discarding: false,
        }
    }

    /// Accept one inbound data frame.
    ///
    /// # Errors
    ///
    /// - `Error::ProtocolViolation` for a Continuation frame with no message in
    ///   progress, a new Text/Binary frame inside a message, or a control frame
    /// - `Error::MessageTooLarge` if the message exceeds the configured maximum
    pub fn push(&mut self, frame: Frame) -> Result<()> {
        let content_type = match (frame.opcode, self.current) {
            (OpCode::Continuation, Some(ct)) => ct,
            (OpCode::Continuation, None) => {
                return Err(Error::ProtocolViolation(
                    "Unexpected continuation frame".into(),
                ));
            }
            (opcode, None) => ContentType::from_opcode(opcode).ok_or_else(|| {
                Error::ProtocolViolation(format!("{opcode:?} frame is not a data frame"))
            })?,
            (_, Some(_)) => {
                return Err(Error::ProtocolViolation(
                    "Expected continuation frame".into(),
                ));
            }
        };

        let new_size = self.message_size + frame.payload().len();
        if new_size > self.max_message_size {
            return Err(Error::MessageTooLarge {
                size: new_size,
                max: self.max_message_size,
            });
        }

        let fin = frame.fin;
        if fin {
            self.current = None;
            self.message_size = 0;
        } else {
            self.current = Some(content_type);
            self.message_size = new_size;
        }

        let data = frame.into_payload();
        self.buffered += data.len();
        self.queue.push_back(InboundFragment {
            data,
            fin,
            content_type,
        });
        self.skip_discarded();
        Ok(())
    }

    /// Returns `true` while a message has started arriving but not finished.
    #[must_use]
    pub fn is_assembling(&self) -> bool {
        self.current.is_some()
    }

    /// Payload bytes queued and not yet delivered.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffered
    }

    /// Returns `true` if nothing is ready for delivery.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Take the next fragment, at most `max` bytes of it.
    ///
    /// A longer fragment is split: the returned part has `fin == false` and the
    /// remainder stays at the front of the queue.
    pub fn next_fragment(&mut self, max: usize) -> Option<InboundFragment> {
        let front = self.queue.front_mut()?;
        let fragment = if front.data.len() > max {
            InboundFragment {
                data: front.data.split_to(max),
                fin: false,
                content_type: front.content_type,
            }
        } else {
            self.queue.pop_front()?
        };
        self.buffered -= fragment.data.len();
        Some(fragment)
    }

    /// Drop the remainder of the message at the front of the queue, through
    /// its final fragment, including fragments that have not arrived yet.
    pub fn discard_rest_of_message(&mut self) {
        self.discarding = true;
        self.skip_discarded();
    }

    fn skip_discarded(&mut self) {
        while self.discarding {
            let Some(fragment) = self.queue.pop_front() else {
                break;
            };
            self.buffered -= fragment.data.len();
            if fragment.fin {
                self.discarding = false;
            }
        }
    }
}

/// A completed inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledMessage {
    /// Message payload.
    pub payload: Bytes,
    /// Message content type.
    pub content_type: ContentType,
}

/// Accumulates one message for a caller buffer of fixed capacity.
#[derive(Debug)]
pub struct MessageCollector {
    buffer: BytesMut,
    capacity: usize,
    content_type: Option<ContentType>,
}

impl MessageCollector {
    /// Collect into at most `capacity` bytes.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            capacity,
            content_type: None,
        }
    }

    /// Drain queued fragments from `assembler`.
    ///
    /// Returns `None` while the message is still incomplete.
    ///
    /// # Errors
    ///
    /// Returns `Error::BufferTooSmall` once the message outgrows the capacity;
    /// the rest of the message is then discarded from `assembler`.
    pub fn poll(&mut self, assembler: &mut MessageAssembler) -> Option<Result<AssembledMessage>> {
        while let Some(fragment) = assembler.next_fragment(usize::MAX) {
            let needed = self.buffer.len() + fragment.data.len();
            if needed > self.capacity {
                if !fragment.fin {
                    assembler.discard_rest_of_message();
                }
                return Some(Err(Error::BufferTooSmall {
                    needed,
                    capacity: self.capacity,
                }));
            }
            self.content_type.get_or_insert(fragment.content_type);
            self.buffer.extend_from_slice(&fragment.data);
            if fragment.fin {
                let content_type = self.content_type.unwrap_or(fragment.content_type);
                return Some(Ok(AssembledMessage {
                    payload: self.buffer.split().freeze(),
                    content_type,
                }));
            }
        }
        None
    }
}
