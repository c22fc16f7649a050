//! Transport seam between the connection manager and a concrete broker.
//!
//! - [`super::amqp`] - RabbitMQ over AMQP 0-9-1 (lapin)
//! - [`super::memory`] - In-process broker for local runs and tests

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use std::sync::Arc;

use super::topology::{BindingSpec, ConsumeOptions, ExchangeSpec, QueueSpec};
use crate::error::BrokerError;

/// Settles a single delivery.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self) -> Result<(), BrokerError>;
    async fn nack(&self, requeue: bool) -> Result<(), BrokerError>;
}

/// A message pushed by the broker, awaiting ack or nack.
pub struct Delivery {
    pub body: Vec<u8>,
    pub redelivered: bool,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(body: Vec<u8>, redelivered: bool, acker: impl Acknowledger + 'static) -> Self {
        Self {
            body,
            redelivered,
            acker: Box::new(acker),
        }
    }

    pub async fn ack(&self) -> Result<(), BrokerError> {
        self.acker.ack().await
    }

    pub async fn nack(&self, requeue: bool) -> Result<(), BrokerError> {
        self.acker.nack(requeue).await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("len", &self.body.len())
            .field("redelivered", &self.redelivered)
            .finish()
    }
}

pub type DeliveryStream = BoxStream<'static, Result<Delivery, BrokerError>>;

/// An active `basic.consume`.
pub struct Consumption {
    pub tag: String,
    pub deliveries: DeliveryStream,
}

#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, url: &str) -> Result<Arc<dyn BrokerConnection>, BrokerError>;
}

#[async_trait]
pub trait BrokerConnection: Send + Sync {
    async fn open_channel(&self) -> Result<Arc<dyn BrokerChannel>, BrokerError>;

    /// Resolves once the connection is lost, with the reason.
    async fn closed(&self) -> BrokerError;

    async fn close(&self) -> Result<(), BrokerError>;
}

/// A logical session on a connection.
///
/// Declarations are idempotent: re-declaring an existing entity with the
/// same properties is a no-op on the broker.
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    async fn declare_exchange(&self, spec: &ExchangeSpec) -> Result<(), BrokerError>;

    async fn declare_queue(&self, spec: &QueueSpec) -> Result<(), BrokerError>;

    async fn bind_queue(&self, spec: &BindingSpec) -> Result<(), BrokerError>;

    async fn consume(
        &self,
        queue: &str,
        options: &ConsumeOptions,
    ) -> Result<Consumption, BrokerError>;

    async fn cancel(&self, consumer_tag: &str) -> Result<(), BrokerError>;

    /// Publishes with publisher confirms; a negative confirm is an error.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
    ) -> Result<(), BrokerError>;
}
