//! Module `state`
//!
//! Lifecycle states of a connection supervisor and why a connection ended.

use std::fmt;
use std::io;

/// Supervisor lifecycle: `Connecting -> Active -> Closing -> Closed`.
///
/// A connection refused at admission goes straight from `Connecting` to `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Connecting,
    Active,
    Closing,
    Closed,
}

impl SupervisorState {
    /// Whether moving from `self` to `next` is a legal transition
    pub fn can_transition_to(self, next: SupervisorState) -> bool {
        use SupervisorState::*;
        matches!(
            (self, next),
            (Connecting, Active) | (Connecting, Closed) | (Active, Closing) | (Closing, Closed)
        )
    }
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SupervisorState::Connecting => "connecting",
            SupervisorState::Active => "active",
            SupervisorState::Closing => "closing",
            SupervisorState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// What moved an active connection to `Closing`
#[derive(Debug)]
pub enum CloseReason {
    /// The peer closed its side of the stream
    PeerClosed,
    /// Reading from the stream failed
    ReadFailed(io::Error),
    /// Writing to the stream failed, so the outbound sink is gone
    SinkFailed,
    /// The server is shutting down
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::PeerClosed => write!(f, "peer closed the connection"),
            CloseReason::ReadFailed(e) => write!(f, "read failed: {}", e),
            CloseReason::SinkFailed => write!(f, "write failed"),
            CloseReason::Shutdown => write!(f, "server shutting down"),
        }
    }
}
