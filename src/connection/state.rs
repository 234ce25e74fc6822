//! Connection state machine.
//!
//! ```text
//! Initial -> OpenPending -> Open -> CloseSentLocal ------> Closed
//!                                \-> CloseReceivedRemote -/
//! any non-terminal state -> Error | Aborted
//! ```
//!
//! `Closed`, `Error` and `Aborted` are terminal: no transition leaves them.

/// WebSocket connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// Created, handshake not started. Timing may still be changed.
    #[default]
    Initial,
    /// Handshake in progress.
    OpenPending,
    /// Handshake succeeded; data flows both ways.
    Open,
    /// Local Close frame sent, peer Close not yet observed.
    CloseSentLocal,
    /// Peer Close frame observed, local Close not yet sent.
    CloseReceivedRemote,
    /// Both directions of the close handshake completed.
    Closed,
    /// Failed by a protocol violation, transport failure or timeout.
    Error,
    /// Aborted by the application.
    Aborted,
}

impl ConnectionState {
    /// Returns `true` for `Closed`, `Error` and `Aborted`.
    #[must_use]
    #[inline]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConnectionState::Closed | ConnectionState::Error | ConnectionState::Aborted
        )
    }

    /// Check if data frames may be sent in this state.
    #[must_use]
    #[inline]
    pub const fn can_send(&self) -> bool {
        matches!(
            self,
            ConnectionState::Open | ConnectionState::CloseReceivedRemote
        )
    }

    /// Check if data frames may still arrive in this state.
    #[must_use]
    #[inline]
    pub const fn can_receive(&self) -> bool {
        matches!(self, ConnectionState::Open | ConnectionState::CloseSentLocal)
    }

    /// Check the transition table.
    #[must_use]
    pub const fn can_transition_to(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        if self.is_terminal() {
            return false;
        }
        match (*self, next) {
            (_, Error | Aborted) => true,
            (Initial, OpenPending) => true,
            (OpenPending, Open) => true,
            (Open, CloseSentLocal | CloseReceivedRemote) => true,
            (CloseSentLocal | CloseReceivedRemote, Closed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Initial => "Initial",
            ConnectionState::OpenPending => "OpenPending",
            ConnectionState::Open => "Open",
            ConnectionState::CloseSentLocal => "CloseSentLocal",
            ConnectionState::CloseReceivedRemote => "CloseReceivedRemote",
            ConnectionState::Closed => "Closed",
            ConnectionState::Error => "Error",
            ConnectionState::Aborted => "Aborted",
        };
        f.write_str(name)
    }
}
