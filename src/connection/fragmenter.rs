//! Outbound message fragmentation (RFC 6455 Section 5.4).

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::message::ContentType;
use crate::protocol::{Frame, OpCode};

/// Iterator that produces frames from a message payload.
///
/// Splits large payloads into multiple frames according to the configured
/// fragment size. First frame uses the content type's opcode, continuation
/// frames use `OpCode::Continuation`. Chunks share the payload's storage.
#[derive(Debug)]
pub struct MessageFragmenter {
    payload: Bytes,
    opcode: OpCode,
    fragment_size: usize,
    offset: usize,
    is_first: bool,
}

impl MessageFragmenter {
    /// Create a new fragmenter for the given payload.
    #[inline]
    #[must_use]
    pub fn new(payload: Bytes, content_type: ContentType, fragment_size: usize) -> Self {
        Self {
            payload,
            opcode: content_type.opcode(),
            fragment_size: fragment_size.max(1),
            offset: 0,
            is_first: true,
        }
    }

    /// Check if fragmentation is needed (payload exceeds fragment_size).
    #[inline]
    #[must_use]
    pub fn needs_fragmentation(&self) -> bool {
        self.payload.len() > self.fragment_size
    }

    /// Get remaining bytes to send.
    #[inline]
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.payload.len().saturating_sub(self.offset)
    }
}

impl Iterator for MessageFragmenter {
    type Item = Frame;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.payload.len() {
            // An empty message is still one frame
            if self.is_first {
                self.is_first = false;
                return Some(Frame::new(true, self.opcode, Bytes::new()));
            }
            return None;
        }

        let chunk_size = self.remaining().min(self.fragment_size);
        let end = self.offset + chunk_size;
        let chunk = self.payload.slice(self.offset..end);
        self.offset = end;

        let opcode = if self.is_first {
            self.is_first = false;
            self.opcode
        } else {
            OpCode::Continuation
        };

        Some(Frame::new(end == self.payload.len(), opcode, chunk))
    }
}

/// Tracks an outbound message built from individual `SendFragment` calls.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FragmentSequencer {
    in_progress: Option<ContentType>,
}

impl FragmentSequencer {
    /// Create a sequencer with no message in progress.
    #[must_use]
    pub const fn new() -> Self {
        Self { in_progress: None }
    }

    /// Returns `true` between a non-final fragment and the final one.
    #[must_use]
    pub const fn is_in_progress(&self) -> bool {
        self.in_progress.is_some()
    }

    /// Build the frame for the next fragment and advance.
    ///
    /// # Errors
    ///
    /// Returns `Error::ContentTypeMismatch` if `content_type` differs from the
    /// message in progress. The sequencer is left unchanged.
    pub fn next_frame(
        &mut self,
        data: Bytes,
        is_final: bool,
        content_type: ContentType,
    ) -> Result<Frame> {
        let opcode = match self.in_progress {
            Some(expected) if expected != content_type => {
                return Err(Error::ContentTypeMismatch {
                    expected,
                    actual: content_type,
                });
            }
            Some(_) => OpCode::Continuation,
            None => content_type.opcode(),
        };
        self.in_progress = if is_final { None } else { Some(content_type) };
        Ok(Frame::new(is_final, opcode, data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragments(payload: Vec<u8>, content_type: ContentType, size: usize) -> Vec<Frame> {
        MessageFragmenter::new(Bytes::from(payload), content_type, size).collect()
    }

    #[test]
    fn test_no_fragmentation_needed() {
        let frag = MessageFragmenter::new(Bytes::from_static(b"Hello"), ContentType::Text, 1024);
        assert!(!frag.needs_fragmentation());

        let frames: Vec<_> = frag.collect();
        assert_eq!(frames.len(), 1);
        assert!(frames[0].fin);
        assert_eq!(frames[0].opcode, OpCode::Text);
        assert_eq!(frames[0].payload(), b"Hello");
    }

    #[test]
    fn test_exact_fragmentation() {
        let frames = fragments(vec![0xAB; 30], ContentType::Binary, 10);
        assert_eq!(frames.len(), 3);

        assert!(!frames[0].fin);
        assert_eq!(frames[0].opcode, OpCode::Binary);
        assert!(!frames[1].fin);
        assert_eq!(frames[1].opcode, OpCode::Continuation);
        assert!(frames[2].fin);
        assert_eq!(frames[2].opcode, OpCode::Continuation);
        assert!(frames.iter().all(|f| f.payload().len() == 10));
    }

    #[test]
    fn test_uneven_fragmentation() {
        let frames = fragments(vec![0xCD; 25], ContentType::Binary, 10);
        let sizes: Vec<_> = frames.iter().map(|f| f.payload().len()).collect();
        assert_eq!(sizes, vec![10, 10, 5]);
        assert!(frames[2].fin);
    }

    #[test]
    fn test_empty_payload() {
        let frames = fragments(Vec::new(), ContentType::Text, 1024);
        assert_eq!(frames.len(), 1);
        assert!(frames[0].fin);
        assert_eq!(frames[0].opcode, OpCode::Text);
        assert!(frames[0].payload().is_empty());
    }

    #[test]
    fn test_remaining_bytes() {
        let mut frag = MessageFragmenter::new(Bytes::from(vec![0xAB; 30]), ContentType::Binary, 10);
        assert_eq!(frag.remaining(), 30);
        frag.next();
        assert_eq!(frag.remaining(), 20);
        frag.next();
        frag.next();
        assert_eq!(frag.remaining(), 0);
        assert!(frag.next().is_none());
    }

    #[test]
    fn test_sequencer_opcodes() {
        let mut seq = FragmentSequencer::new();
        let f1 = seq.next_frame(Bytes::from_static(b"a"), false, ContentType::Binary).unwrap();
        assert_eq!((f1.opcode, f1.fin), (OpCode::Binary, false));
        assert!(seq.is_in_progress());

        let f2 = seq.next_frame(Bytes::from_static(b"b"), false, ContentType::Binary).unwrap();
        assert_eq!(f2.opcode, OpCode::Continuation);

        let f3 = seq.next_frame(Bytes::from_static(b"c"), true, ContentType::Binary).unwrap();
        assert_eq!((f3.opcode, f3.fin), (OpCode::Continuation, true));
        assert!(!seq.is_in_progress());

        let f4 = seq.next_frame(Bytes::from_static(b"d"), true, ContentType::Text).unwrap();
        assert_eq!(f4.opcode, OpCode::Text);
    }

    #[test]
    fn test_sequencer_content_type_mismatch() {
        let mut seq = FragmentSequencer::new();
        seq.next_frame(Bytes::new(), false, ContentType::Binary).unwrap();
        let err = seq.next_frame(Bytes::new(), false, ContentType::Text).unwrap_err();
        assert_eq!(
            err,
            Error::ContentTypeMismatch {
                expected: ContentType::Binary,
                actual: ContentType::Text,
            }
        );
        assert!(seq.is_in_progress());
    }
}
