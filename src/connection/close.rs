//! Close handshake bookkeeping (RFC 6455 Section 7).
//!
//! Records the Close frames sent and received and derives the state each one
//! moves the connection to. Timeouts and transport shutdown are driven by the
//! executor.

use crate::connection::ConnectionState;
use crate::error::{Error, Result};
use crate::message::CloseInfo;

/// Both halves of the close handshake.
#[derive(Debug, Default, Clone)]
pub struct CloseHandshake {
    local: Option<CloseInfo>,
    remote: Option<CloseInfo>,
}

impl CloseHandshake {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The Close frame we sent, if any.
    #[must_use]
    pub fn local(&self) -> Option<&CloseInfo> {
        self.local.as_ref()
    }

    /// The Close frame the peer sent, if any.
    #[must_use]
    pub fn remote(&self) -> Option<&CloseInfo> {
        self.remote.as_ref()
    }

    /// Status code the peer closed with, for `ConnectionClosed`.
    #[must_use]
    pub fn remote_code(&self) -> Option<u16> {
        self.remote
            .as_ref()
            .and_then(|info| info.code)
            .map(|code| code.as_u16())
    }

    /// Check that a local close may start in `state`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidState` unless `state` is `Open` or
    /// `CloseReceivedRemote`, or if a local Close was already queued.
    pub fn check_local(&self, state: ConnectionState) -> Result<()> {
        match state {
            ConnectionState::Open | ConnectionState::CloseReceivedRemote
                if self.local.is_none() =>
            {
                Ok(())
            }
            other => Err(Error::InvalidState(other)),
        }
    }

    /// Record our Close frame. Returns the state once it is on the wire.
    pub fn local_sent(&mut self, info: CloseInfo, state: ConnectionState) -> ConnectionState {
        self.local = Some(info);
        match state {
            ConnectionState::Open => ConnectionState::CloseSentLocal,
            ConnectionState::CloseReceivedRemote => ConnectionState::Closed,
            other => other,
        }
    }

    /// Record the peer's Close frame. Returns the resulting state.
    pub fn remote_received(&mut self, info: CloseInfo, state: ConnectionState) -> ConnectionState {
        if self.remote.is_none() {
            self.remote = Some(info);
        }
        match state {
            ConnectionState::Open => ConnectionState::CloseReceivedRemote,
            ConnectionState::CloseSentLocal => ConnectionState::Closed,
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{CloseCode, CloseInitiator};

    fn local() -> CloseInfo {
        CloseInfo::local(CloseCode::Normal, "bye").unwrap()
    }

    fn remote() -> CloseInfo {
        CloseInfo::parse_remote(&[0x03, 0xe9]).unwrap()
    }

    #[test]
    fn test_local_initiated_close() {
        let mut close = CloseHandshake::new();
        assert!(close.check_local(ConnectionState::Open).is_ok());

        let state = close.local_sent(local(), ConnectionState::Open);
        assert_eq!(state, ConnectionState::CloseSentLocal);
        assert_eq!(
            close.check_local(state),
            Err(Error::InvalidState(ConnectionState::CloseSentLocal))
        );

        let state = close.remote_received(remote(), state);
        assert_eq!(state, ConnectionState::Closed);
        assert_eq!(close.remote_code(), Some(1001));
        assert_eq!(close.local().unwrap().initiator, CloseInitiator::Local);
    }

    #[test]
    fn test_remote_initiated_close() {
        let mut close = CloseHandshake::new();
        let state = close.remote_received(remote(), ConnectionState::Open);
        assert_eq!(state, ConnectionState::CloseReceivedRemote);
        assert_eq!(close.remote().unwrap().initiator, CloseInitiator::Remote);
        assert!(close.check_local(state).is_ok());

        let state = close.local_sent(local(), state);
        assert_eq!(state, ConnectionState::Closed);
    }

    #[test]
    fn test_close_rejected_before_open() {
        let close = CloseHandshake::new();
        for state in [ConnectionState::Initial, ConnectionState::OpenPending] {
            assert_eq!(close.check_local(state), Err(Error::InvalidState(state)));
        }
    }

    #[test]
    fn test_empty_remote_close_has_no_code() {
        let mut close = CloseHandshake::new();
        close.remote_received(CloseInfo::parse_remote(&[]).unwrap(), ConnectionState::Open);
        assert_eq!(close.remote_code(), None);
    }
}
