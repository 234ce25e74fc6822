//! Connection role: which end of the upgrade handshake this endpoint plays.

/// WebSocket connection role.
///
/// Determines handshake direction and masking behavior per RFC 6455.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Sends the upgrade request; must mask outgoing frames.
    Initiator,
    /// Answers the upgrade request; must not mask outgoing frames.
    Acceptor,
}

impl Role {
    /// Check if this role must mask outgoing frames.
    #[inline]
    #[must_use]
    pub const fn must_mask(&self) -> bool {
        matches!(self, Role::Initiator)
    }

    /// Check if this role expects incoming frames to be masked.
    #[inline]
    #[must_use]
    pub const fn expects_masked(&self) -> bool {
        matches!(self, Role::Acceptor)
    }

    /// The role of the other end.
    #[inline]
    #[must_use]
    pub const fn peer(&self) -> Role {
        match self {
            Role::Initiator => Role::Acceptor,
            Role::Acceptor => Role::Initiator,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Initiator => write!(f, "Initiator"),
            Role::Acceptor => write!(f, "Acceptor"),
        }
    }
}
