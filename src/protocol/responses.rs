//! Server notices
//!
//! Texts sent under the reserved server identity.

use crate::protocol::{ConnectionId, Message};

pub fn joined(id: ConnectionId) -> Message {
    Message::from_server(format!("{} has joined the chat.", id))
}

pub fn left(id: ConnectionId) -> Message {
    Message::from_server(format!("{} has left the chat.", id))
}

/// Sent privately to a newly registered connection
pub fn welcome(id: ConnectionId) -> Message {
    Message::from_server(format!("You are connected as {}", id))
}

/// Sent to a connection refused because the server is at capacity
pub fn server_full() -> Message {
    Message::from_server("Server is full, try again later.")
}

/// Sent privately to a sender whose line exceeded the length limit
pub fn line_too_long(limit: usize) -> Message {
    Message::from_server(format!("Message too long (max {} bytes)", limit))
}
