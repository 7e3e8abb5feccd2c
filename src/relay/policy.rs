//! Recipient selection

use serde::Deserialize;

use crate::protocol::{ConnectionId, Origin};

/// Whether a client receives the messages it sent itself.
///
/// Server announcements are delivered to every registered connection under
/// either policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelfDelivery {
    /// Senders get their own lines back, like every other recipient
    #[default]
    Echo,
    /// Senders are skipped when their own lines are fanned out
    Suppress,
}

impl SelfDelivery {
    pub fn includes(self, origin: Origin, recipient: ConnectionId) -> bool {
        match (self, origin) {
            (SelfDelivery::Suppress, Origin::Client(sender)) => sender != recipient,
            _ => true,
        }
    }
}
