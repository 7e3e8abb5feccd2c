//! Shutdown signalling
//!
//! One `watch` channel fans the shutdown flag out to the accept loop and every
//! connection supervisor.

use std::sync::Arc;
use tokio::sync::watch;

/// Cloneable trigger for a server's graceful shutdown
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub(crate) fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Ask the server to stop accepting and close every connection
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}
