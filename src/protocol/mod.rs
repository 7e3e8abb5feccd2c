//! Relay wire protocol
//!
//! Connection identities, relayed messages and the newline-delimited text
//! encoding delivered to clients.

pub mod message;
pub mod responses;

pub use message::{ConnectionId, Message, Origin, SERVER_LABEL};
