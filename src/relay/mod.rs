//! Message relay
//!
//! Fan-out of messages to every registered connection.

pub mod broadcaster;
pub mod context;
pub mod policy;

pub use broadcaster::{BroadcastReport, Broadcaster};
pub use context::RelayContext;
pub use policy::SelfDelivery;
