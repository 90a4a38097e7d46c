//! Shared, read-mostly state every handler can reach.

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::players::{ChatBroadcaster, PlayerRegistry};
use crate::protocol::login::KeyExchange;
use crate::protocol::message::{PayloadCodec, StandardCodec};

pub struct ServerContext {
    pub config: EngineConfig,
    pub registry: Arc<PlayerRegistry>,
    pub broadcaster: ChatBroadcaster,
    pub key_exchange: Option<Arc<dyn KeyExchange>>,
    pub codec: Arc<dyn PayloadCodec>,
}

impl ServerContext {
    pub fn new(config: EngineConfig) -> Self {
        let registry = Arc::new(PlayerRegistry::new(config.server.max_players));
        Self {
            broadcaster: ChatBroadcaster::new(registry.clone()),
            registry,
            key_exchange: None,
            codec: Arc::new(StandardCodec),
            config,
        }
    }

    /// Key exchange used when `online_mode` is set
    pub fn with_key_exchange(mut self, key_exchange: Arc<dyn KeyExchange>) -> Self {
        self.key_exchange = Some(key_exchange);
        self
    }

    pub fn with_codec(mut self, codec: Arc<dyn PayloadCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// Whether logins go through the encryption exchange
    pub fn encryption_required(&self) -> bool {
        self.config.session.online_mode && self.key_exchange.is_some()
    }
}
