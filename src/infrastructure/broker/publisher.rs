//! [`EventPublisher`] backed by the connection manager.

use async_trait::async_trait;

use super::manager::ConnectionManager;
use crate::domain::outbox::{EventPublisher, OutboundMessage};
use crate::error::BrokerError;

/// Publishes outbox messages on one named channel of the manager.
#[derive(Clone)]
pub struct BrokerPublisher {
    manager: ConnectionManager,
    channel: String,
}

impl BrokerPublisher {
    pub fn new(manager: ConnectionManager, channel: impl Into<String>) -> Self {
        Self {
            manager,
            channel: channel.into(),
        }
    }
}

#[async_trait]
impl EventPublisher for BrokerPublisher {
    async fn publish(&self, message: &OutboundMessage) -> Result<(), BrokerError> {
        self.manager
            .publish(
                &self.channel,
                message.exchange,
                message.routing_key,
                &message.body,
            )
            .await
    }
}
