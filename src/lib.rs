//! # wsengine - WebSocket protocol engine
//!
//! `wsengine` drives one RFC 6455 WebSocket connection per transport: the
//! upgrade handshake with subprotocol negotiation, message and fragment
//! send/receive, the close handshake, and liveness timers (quiet-channel ping,
//! pong watchdog, keepalive pong, open and close timeouts).
//!
//! ## Features
//!
//! - **Serialized executor**: every state change of a connection happens on one
//!   task, so handles can be cloned and used concurrently without locks
//! - **Full duplex**: sends and receives proceed independently, one in flight
//!   per direction, queued in issue order
//! - **Strict framing**: masking direction, reserved bits, opcodes and control
//!   frame limits are enforced on every inbound frame
//! - **Configurable liveness**: each timer can be set or disabled by name
//!   (`OpenTimeoutMs`, `PongKeepAlivePeriodMs`, ...)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use wsengine::{Config, Connection, ContentType, OpenOptions, Role};
//!
//! # async fn run(stream: tokio::net::TcpStream) -> wsengine::Result<()> {
//! let conn = Connection::new(stream, Role::Acceptor, Config::acceptor())?;
//! conn.open(OpenOptions::default().with_subprotocols(["chat.v2", "chat.v1"]))
//!     .await?;
//!
//! let mut buf = vec![0u8; 64 * 1024];
//! let msg = conn.receive_message(&mut buf).await?;
//! conn.send_message(buf[..msg.len].to_vec(), msg.content_type).await?;
//! # Ok(())
//! # }
//! ```
//!
//! The crate logs through `tracing` and never installs a subscriber.

pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod message;
pub mod protocol;

pub use config::{Config, Limits, TimerSetting, Timing, TimingConstant};
pub use connection::{
    CloseCallback, Connection, ConnectionState, FragmentReceipt, MessageReceipt, OpenOptions, Role,
};
pub use error::{Error, Result};
pub use message::{CloseCode, CloseInfo, CloseInitiator, ContentType};
pub use protocol::{Frame, HandshakeRequest, HandshakeResponse, OpCode, WS_GUID, compute_accept_key};
