//! Message broker plumbing.
//!
//! # Modules
//!
//! - [`manager`] - Connection supervisor with reconnect and topology replay
//! - [`consumer`] - Consumer tasks with manual ack/nack
//! - [`topology`] - Exchange, queue, binding and consumer declarations
//! - [`transport`] - Traits implemented by concrete brokers
//! - [`amqp`] - RabbitMQ transport
//! - [`memory`] - In-process transport
//! - [`publisher`] - Outbox publishing port over the manager

pub mod amqp;
pub mod consumer;
pub mod manager;
pub mod memory;
pub mod publisher;
pub mod topology;
pub mod transport;

use std::sync::Arc;

pub use amqp::AmqpDialer;
pub use consumer::MessageHandler;
pub use manager::{BackoffPolicy, ConnectionManager, ConnectionState};
pub use memory::{MemoryBroker, MemoryDialer, PublishedMessage};
pub use publisher::BrokerPublisher;
pub use topology::{
    BindingSpec, ConsumeOptions, ExchangeKind, ExchangeSpec, QueueSpec, TopologyRegistry,
};
pub use transport::{BrokerChannel, BrokerConnection, Delivery, Dialer};

/// URL scheme served by [`MemoryBroker`].
pub const MEMORY_SCHEME: &str = "memory://";

/// Picks the transport for a broker URL.
///
/// `memory://` URLs get a fresh in-process broker; anything else is dialed
/// over AMQP.
pub fn dialer_for(url: &str) -> Arc<dyn Dialer> {
    if url.starts_with(MEMORY_SCHEME) {
        Arc::new(MemoryBroker::new().dialer())
    } else {
        Arc::new(AmqpDialer)
    }
}
