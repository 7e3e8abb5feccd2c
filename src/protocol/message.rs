//! Module `message`
//!
//! A relayed line of text and the identity it is attributed to.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Label carried by announcements from the reserved server identity.
pub const SERVER_LABEL: &str = "SERVER";

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Server-assigned identity of one accepted connection.
///
/// Unique for the lifetime of the process; rendered as `client-<n>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate the next identity
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Build an identity from a raw value (tests and tooling)
    pub fn from_raw(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// Logical sender of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Reserved pseudo-identity used for join/leave and other notices
    Server,
    Client(ConnectionId),
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Server => f.write_str(SERVER_LABEL),
            Origin::Client(id) => id.fmt(f),
        }
    }
}

/// One line of text attributed to an origin. Exists only during fan-out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    origin: Origin,
    text: String,
}

impl Message {
    pub fn new(origin: Origin, text: impl Into<String>) -> Self {
        Self {
            origin,
            text: text.into(),
        }
    }

    pub fn from_client(id: ConnectionId, text: impl Into<String>) -> Self {
        Self::new(Origin::Client(id), text)
    }

    pub fn from_server(text: impl Into<String>) -> Self {
        Self::new(Origin::Server, text)
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Encode as a single newline-terminated wire line: `<origin>: <text>\n`.
    ///
    /// Embedded line breaks are replaced so one message is always one line.
    pub fn to_line(&self) -> String {
        let mut line = String::with_capacity(self.text.len() + 16);
        line.push_str(&self.origin.to_string());
        line.push_str(": ");
        for c in self.text.chars() {
            line.push(if c == '\n' || c == '\r' { ' ' } else { c });
        }
        line.push('\n');
        line
    }
}
