//! Explicit lifecycle of a logical session

use std::fmt;

/// Lifecycle state of a [`SessionManager`](super::SessionManager)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    HandshakeInProgress,
    Ready,
    Busy,
    Closed,
}

impl SessionState {
    /// Whether moving from `self` to `next` is a legal transition
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;

        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, HandshakeInProgress)
                | (Connecting, Ready)
                | (Connecting, Disconnected)
                | (HandshakeInProgress, Ready)
                | (HandshakeInProgress, Disconnected)
                | (Ready, Busy)
                | (Busy, Ready)
        ) || (self != Closed && next == Closed)
    }

    pub fn is_usable(self) -> bool {
        matches!(self, SessionState::Ready | SessionState::Busy)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::HandshakeInProgress => "handshaking",
            SessionState::Ready => "ready",
            SessionState::Busy => "busy",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}
