//! Module `broadcaster`
//!
//! Delivers one message to every connection in a registry snapshot. The
//! registry lock is never held while delivering.

use log::{debug, error};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

use crate::client::{Offer, Registry};
use crate::error::DeliveryError;
use crate::error::handlers::handle_delivery_error;
use crate::protocol::Message;
use crate::relay::SelfDelivery;

/// Per-call fan-out summary
#[derive(Debug, Default)]
pub struct BroadcastReport {
    /// Recipients the message was queued for
    pub delivered: usize,
    /// Recipients skipped for this message
    pub failed: Vec<DeliveryError>,
}

#[derive(Clone)]
pub struct Broadcaster {
    registry: Arc<Registry>,
    policy: SelfDelivery,
    delivery_timeout: Duration,
}

impl Broadcaster {
    pub fn new(registry: Arc<Registry>, policy: SelfDelivery, delivery_timeout: Duration) -> Self {
        Self {
            registry,
            policy,
            delivery_timeout,
        }
    }

    /// Deliver `message` to every selected recipient in a fresh snapshot.
    ///
    /// Recipients with room in their queue are served first without waiting.
    /// Recipients with a full queue are then waited on together, so the whole
    /// call takes at most one delivery timeout however many are backlogged.
    /// A failing recipient is skipped for this message only and is never
    /// removed from the registry here.
    pub async fn broadcast(&self, message: Message) -> BroadcastReport {
        let snapshot = self.registry.snapshot().await;
        let origin = message.origin();
        let message = Arc::new(message);
        let mut report = BroadcastReport::default();
        let mut backlogged = JoinSet::new();

        for (recipient, sink) in snapshot.iter() {
            if !self.policy.includes(origin, *recipient) {
                continue;
            }
            match sink.offer(Arc::clone(&message)) {
                Offer::Queued => report.delivered += 1,
                Offer::Full(message) => {
                    let sink = sink.clone();
                    let wait = self.delivery_timeout;
                    let delivery = async move { sink.deliver(message, wait).await };
                    backlogged.spawn(delivery);
                }
                Offer::Closed => report.failed.push(DeliveryError::Closed(*recipient)),
            }
        }

        while let Some(outcome) = backlogged.join_next().await {
            match outcome {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) => report.failed.push(e),
                Err(e) => error!("Delivery task failed: {}", e),
            }
        }

        for failure in &report.failed {
            handle_delivery_error(failure);
        }
        debug!(
            "Broadcast from {} reached {} recipient(s), {} skipped",
            origin,
            report.delivered,
            report.failed.len()
        );
        report
    }
}
