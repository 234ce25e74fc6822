//! WebSocket protocol core (RFC 6455): opcodes, frames, masking, the upgrade
//! handshake and inbound message reassembly.
//!
//! Everything here is synchronous and transport-agnostic; the async plumbing
//! lives in [`crate::codec`] and [`crate::connection`].

pub mod assembler;
pub mod frame;
pub mod handshake;
pub mod mask;
pub mod opcode;

pub use assembler::{AssembledMessage, InboundFragment, MessageAssembler};
pub use frame::{Frame, FrameHeader};
pub use handshake::{
    HandshakeRequest, HandshakeResponse, WS_GUID, compute_accept_key, select_subprotocol,
};
pub use mask::{MaskGenerator, apply_mask};
pub use opcode::OpCode;
