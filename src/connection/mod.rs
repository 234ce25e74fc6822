//! Connections: the state machine, the serialized executor that drives one
//! transport, and the [`Connection`] handle applications talk to.
//!
//! ## Connection Lifecycle
//!
//! 1. **Initial** - created; timing may still be changed
//! 2. **OpenPending** - upgrade handshake in flight, bounded by the open timeout
//! 3. **Open** - messages flow both ways; liveness timers run
//! 4. **CloseSentLocal / CloseReceivedRemote** - one Close frame exchanged
//! 5. **Closed** - both Close frames exchanged; the transport is shut down
//!
//! `Error` and `Aborted` end a connection from any earlier state.

mod close;
#[allow(clippy::module_inception)]
mod connection;
mod driver;
mod fragmenter;
mod liveness;
mod role;
mod state;

pub use close::CloseHandshake;
pub use connection::{CloseCallback, Connection, FragmentReceipt, MessageReceipt, OpenOptions};
pub use fragmenter::{FragmentSequencer, MessageFragmenter};
pub use liveness::{Liveness, TimerKind};
pub use role::Role;
pub use state::ConnectionState;
