//! Input validation utilities
//!
//! Decides which inbound lines are relayed.

/// Return the line if it should be relayed: not blank, no NUL bytes.
pub fn relayable(line: &str) -> Option<&str> {
    if line.trim().is_empty() || line.contains('\0') {
        None
    } else {
        Some(line)
    }
}
