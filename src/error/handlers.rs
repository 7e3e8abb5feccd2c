//! Error handlers
//!
//! Provides error logging and classification helpers.

use crate::error::types::{DeliveryError, RelayError};
use log::{debug, error, warn};
use std::io;

/// Handle a relay server error
pub fn handle_error(err: &RelayError) {
    error!("Relay Server Error: {}", err);
}

/// Log a per-recipient fan-out failure. Never escalated.
pub fn handle_delivery_error(err: &DeliveryError) {
    match err {
        // The recipient's own supervisor is already tearing it down
        DeliveryError::Closed(_) => debug!("Skipped recipient: {}", err),
        DeliveryError::TimedOut(_) => warn!("Skipped recipient: {}", err),
    }
}

/// Whether an I/O error only means the peer went away
pub fn is_disconnect(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::NotConnected
    )
}
