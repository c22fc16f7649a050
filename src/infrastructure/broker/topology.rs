//! Declarative broker topology and the registry replayed after a reconnect.

use std::sync::Arc;

use super::consumer::MessageHandler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeKind {
    Direct,
    Fanout,
    Topic,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeSpec {
    pub name: String,
    pub kind: ExchangeKind,
    pub durable: bool,
    pub auto_delete: bool,
}

impl ExchangeSpec {
    pub fn fanout(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ExchangeKind::Fanout,
            durable: true,
            auto_delete: false,
        }
    }

    pub fn direct(name: impl Into<String>) -> Self {
        Self {
            kind: ExchangeKind::Direct,
            ..Self::fanout(name)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSpec {
    pub name: String,
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
    /// Exchange receiving messages rejected without requeue.
    pub dead_letter_exchange: Option<String>,
}

impl QueueSpec {
    pub fn durable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            durable: true,
            exclusive: false,
            auto_delete: false,
            dead_letter_exchange: None,
        }
    }

    pub fn with_dead_letter(mut self, exchange: impl Into<String>) -> Self {
        self.dead_letter_exchange = Some(exchange.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingSpec {
    pub queue: String,
    pub exchange: String,
    pub routing_key: String,
}

impl BindingSpec {
    pub fn new(
        queue: impl Into<String>,
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
    ) -> Self {
        Self {
            queue: queue.into(),
            exchange: exchange.into(),
            routing_key: routing_key.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumeOptions {
    /// Consumer tag; the broker generates one when `None`.
    pub tag: Option<String>,
    /// Requeue a delivery whose handler failed transiently.
    pub requeue_on_nack: bool,
    /// Per-consumer prefetch (QoS).
    pub prefetch: Option<u16>,
}

impl Default for ConsumeOptions {
    fn default() -> Self {
        Self {
            tag: None,
            requeue_on_nack: true,
            prefetch: None,
        }
    }
}

/// A consumer as registered by the application.
#[derive(Clone)]
pub struct ConsumerRegistration {
    pub channel: String,
    pub queue: String,
    pub handler: Arc<dyn MessageHandler>,
    pub options: ConsumeOptions,
}

impl std::fmt::Debug for ConsumerRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerRegistration")
            .field("channel", &self.channel)
            .field("queue", &self.queue)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Everything that was successfully applied on the broker, in the order it
/// has to be replayed: channels, exchanges, queues, bindings, consumers.
///
/// Exchanges, queues and consumers are keyed by name (a later registration
/// replaces the earlier one in place); bindings are deduplicated.
#[derive(Debug, Default)]
pub struct TopologyRegistry {
    channels: Vec<String>,
    exchanges: Vec<(String, ExchangeSpec)>,
    queues: Vec<(String, QueueSpec)>,
    bindings: Vec<(String, BindingSpec)>,
    consumers: Vec<ConsumerRegistration>,
}

impl TopologyRegistry {
    pub fn has_channel(&self, name: &str) -> bool {
        self.channels.iter().any(|c| c == name)
    }

    pub fn record_channel(&mut self, name: &str) {
        if !self.has_channel(name) {
            self.channels.push(name.to_string());
        }
    }

    pub fn record_exchange(&mut self, channel: &str, spec: ExchangeSpec) {
        upsert(&mut self.exchanges, channel, spec, |a, b| a.name == b.name);
    }

    pub fn record_queue(&mut self, channel: &str, spec: QueueSpec) {
        upsert(&mut self.queues, channel, spec, |a, b| a.name == b.name);
    }

    pub fn record_binding(&mut self, channel: &str, spec: BindingSpec) {
        upsert(&mut self.bindings, channel, spec, |a, b| a == b);
    }

    pub fn record_consumer(&mut self, registration: ConsumerRegistration) {
        match self
            .consumers
            .iter_mut()
            .find(|c| c.queue == registration.queue)
        {
            Some(existing) => *existing = registration,
            None => self.consumers.push(registration),
        }
    }

    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    pub fn exchanges(&self) -> &[(String, ExchangeSpec)] {
        &self.exchanges
    }

    pub fn queues(&self) -> &[(String, QueueSpec)] {
        &self.queues
    }

    pub fn bindings(&self) -> &[(String, BindingSpec)] {
        &self.bindings
    }

    pub fn consumers(&self) -> &[ConsumerRegistration] {
        &self.consumers
    }
}

fn upsert<T>(
    entries: &mut Vec<(String, T)>,
    channel: &str,
    spec: T,
    same: impl Fn(&T, &T) -> bool,
) {
    match entries.iter_mut().find(|(_, existing)| same(existing, &spec)) {
        Some(entry) => *entry = (channel.to_string(), spec),
        None => entries.push((channel.to_string(), spec)),
    }
}
