//! Shared state handed to every connection supervisor

use std::sync::Arc;

use crate::client::Registry;
use crate::config::ServerConfig;
use crate::relay::Broadcaster;

/// Cheap-to-clone bundle of the registry, the broadcaster and the configuration
#[derive(Clone)]
pub struct RelayContext {
    pub registry: Arc<Registry>,
    pub broadcaster: Broadcaster,
    pub config: Arc<ServerConfig>,
}

impl RelayContext {
    pub fn new(config: ServerConfig) -> Self {
        let registry = Arc::new(Registry::new());
        let broadcaster = Broadcaster::new(
            Arc::clone(&registry),
            config.self_delivery,
            config.delivery_timeout(),
        );
        Self {
            registry,
            broadcaster,
            config: Arc::new(config),
        }
    }
}
