//! Error types
//!
//! Defines domain-specific error types for the registry, the fan-out path and
//! the server as a whole.

use std::fmt;
use std::io;

use crate::protocol::ConnectionId;

/// Registry errors
#[derive(Debug, PartialEq, Eq)]
pub enum RegistryError {
    /// The sink offered for registration can no longer be written to
    SinkClosed(ConnectionId),
    /// Admission refused because the registry is at capacity
    Full { limit: usize },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::SinkClosed(id) => write!(f, "Sink for {} is already closed", id),
            RegistryError::Full { limit } => write!(f, "Registry is full (limit {})", limit),
        }
    }
}

impl std::error::Error for RegistryError {}

/// Per-recipient delivery failures during fan-out.
///
/// These are recovered locally by skipping the recipient for one message.
#[derive(Debug, PartialEq, Eq)]
pub enum DeliveryError {
    /// The recipient's writer has stopped
    Closed(ConnectionId),
    /// The recipient's queue stayed full for the whole delivery timeout
    TimedOut(ConnectionId),
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryError::Closed(id) => write!(f, "Recipient {} is no longer writable", id),
            DeliveryError::TimedOut(id) => write!(f, "Timed out delivering to {}", id),
        }
    }
}

impl std::error::Error for DeliveryError {}

/// General relay server error
#[derive(Debug)]
pub enum RelayError {
    Config(config::ConfigError),
    Bind(String, io::Error),
    Io(io::Error),
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayError::Config(e) => write!(f, "Configuration error: {}", e),
            RelayError::Bind(addr, e) => write!(f, "Failed to bind to {}: {}", addr, e),
            RelayError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for RelayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RelayError::Config(e) => Some(e),
            RelayError::Bind(_, e) | RelayError::Io(e) => Some(e),
        }
    }
}

impl From<config::ConfigError> for RelayError {
    fn from(error: config::ConfigError) -> Self {
        RelayError::Config(error)
    }
}

impl From<io::Error> for RelayError {
    fn from(error: io::Error) -> Self {
        RelayError::Io(error)
    }
}
