//! In-process broker speaking the same transport traits as the AMQP one.
//!
//! Routing follows AMQP closely enough for local runs and tests: the default
//! exchange routes by queue name, fanout exchanges copy to every bound queue,
//! direct and topic exchanges match the routing key exactly. Unacked
//! deliveries are requeued when their connection drops or their consumer is
//! cancelled, and messages rejected without requeue go to the queue's
//! dead-letter exchange.
//!
//! [`MemoryBroker::drop_connections`] and [`MemoryBroker::set_offline`]
//! simulate network failures.

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::topology::{BindingSpec, ConsumeOptions, ExchangeKind, ExchangeSpec, QueueSpec};
use super::transport::{
    Acknowledger, BrokerChannel, BrokerConnection, Consumption, Delivery, Dialer,
};
use crate::error::BrokerError;

#[derive(Debug, Clone)]
struct Message {
    body: Vec<u8>,
    redelivered: bool,
}

/// A message accepted by [`BrokerChannel::publish`].
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub exchange: String,
    pub routing_key: String,
    pub body: Vec<u8>,
}

struct ConsumerSlot {
    tag: String,
    connection: u64,
    prefetch: Option<usize>,
    tx: mpsc::UnboundedSender<Result<Delivery, BrokerError>>,
}

struct Unacked {
    consumer: String,
    connection: u64,
    message: Message,
}

#[derive(Default)]
struct Queue {
    dead_letter_exchange: Option<String>,
    ready: VecDeque<Message>,
    consumers: Vec<ConsumerSlot>,
    unacked: HashMap<u64, Unacked>,
    next_consumer: usize,
}

#[derive(Default)]
struct State {
    handle: Weak<Mutex<State>>,
    offline: bool,
    dial_attempts: usize,
    next_id: u64,
    open_connections: HashMap<u64, CancellationToken>,
    exchanges: HashMap<String, ExchangeKind>,
    queues: HashMap<String, Queue>,
    bindings: Vec<BindingSpec>,
    published: Vec<PublishedMessage>,
    nack_next_publishes: usize,
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn ensure_open(&self, connection: u64) -> Result<(), BrokerError> {
        if self.open_connections.contains_key(&connection) {
            Ok(())
        } else {
            Err(BrokerError::ConnectionClosed("connection dropped".to_string()))
        }
    }

    fn route(&mut self, exchange: &str, routing_key: &str, message: Message) -> Result<(), BrokerError> {
        let targets: Vec<String> = if exchange.is_empty() {
            vec![routing_key.to_string()]
        } else {
            let kind = *self.exchanges.get(exchange).ok_or_else(|| {
                BrokerError::Transport(format!("no exchange '{exchange}'"))
            })?;
            self.bindings
                .iter()
                .filter(|b| b.exchange == exchange)
                .filter(|b| kind == ExchangeKind::Fanout || b.routing_key == routing_key)
                .map(|b| b.queue.clone())
                .collect()
        };

        for name in targets {
            // Unroutable messages are dropped, as without the mandatory flag.
            if let Some(queue) = self.queues.get_mut(&name) {
                queue.ready.push_back(message.clone());
                self.pump(&name);
            }
        }
        Ok(())
    }

    /// Pushes ready messages to consumers with free prefetch capacity.
    fn pump(&mut self, name: &str) {
        let mut next_tag = self.next_id;
        let handle = self.handle.clone();
        let Some(queue) = self.queues.get_mut(name) else {
            return;
        };

        while !queue.ready.is_empty() && !queue.consumers.is_empty() {
            let count = queue.consumers.len();
            let start = queue.next_consumer % count;
            let free = (0..count).map(|i| (start + i) % count).find(|&i| {
                let slot = &queue.consumers[i];
                let in_flight = queue
                    .unacked
                    .values()
                    .filter(|u| u.consumer == slot.tag)
                    .count();
                slot.prefetch.is_none_or(|p| in_flight < p)
            });
            let Some(index) = free else {
                break;
            };
            queue.next_consumer = index + 1;

            let Some(message) = queue.ready.pop_front() else {
                break;
            };
            next_tag += 1;
            let slot = &queue.consumers[index];
            let delivery = Delivery::new(
                message.body.clone(),
                message.redelivered,
                MemoryAcker {
                    state: handle.clone(),
                    queue: name.to_string(),
                    tag: next_tag,
                },
            );
            if slot.tx.send(Ok(delivery)).is_err() {
                // Receiver gone: the consumer was dropped without cancel.
                queue.ready.push_front(message);
                queue.consumers.remove(index);
                continue;
            }
            queue.unacked.insert(
                next_tag,
                Unacked {
                    consumer: slot.tag.clone(),
                    connection: slot.connection,
                    message,
                },
            );
        }
        self.next_id = next_tag;
    }

    fn requeue(queue: &mut Queue, keep: impl Fn(&Unacked) -> bool) {
        let tags: Vec<u64> = queue
            .unacked
            .iter()
            .filter(|(_, u)| !keep(u))
            .map(|(tag, _)| *tag)
            .collect();
        let mut returned: Vec<(u64, Message)> = tags
            .into_iter()
            .filter_map(|tag| queue.unacked.remove(&tag).map(|u| (tag, u.message)))
            .collect();
        returned.sort_by_key(|(tag, _)| std::cmp::Reverse(*tag));
        for (_, mut message) in returned {
            message.redelivered = true;
            queue.ready.push_front(message);
        }
    }
}

/// Shared in-process broker. Clones refer to the same broker.
#[derive(Clone)]
pub struct MemoryBroker {
    state: Arc<Mutex<State>>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        let state = Arc::new_cyclic(|handle| {
            Mutex::new(State {
                handle: handle.clone(),
                ..State::default()
            })
        });
        Self { state }
    }

    pub fn dialer(&self) -> MemoryDialer {
        MemoryDialer {
            broker: self.clone(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Severs every open connection, as a network failure would.
    pub fn drop_connections(&self) {
        let tokens: Vec<CancellationToken> = {
            let mut state = self.lock();
            let names: Vec<String> = state.queues.keys().cloned().collect();
            for name in names {
                if let Some(queue) = state.queues.get_mut(&name) {
                    queue.consumers.clear();
                    State::requeue(queue, |_| false);
                }
            }
            state.open_connections.drain().map(|(_, t)| t).collect()
        };
        for token in tokens {
            token.cancel();
        }
    }

    /// While offline every dial attempt fails.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Makes the next `count` publishes receive a negative confirm.
    pub fn nack_next_publishes(&self, count: usize) {
        self.lock().nack_next_publishes = count;
    }

    pub fn dial_attempts(&self) -> usize {
        self.lock().dial_attempts
    }

    pub fn open_connections(&self) -> usize {
        self.lock().open_connections.len()
    }

    pub fn has_exchange(&self, name: &str) -> bool {
        self.lock().exchanges.contains_key(name)
    }

    pub fn has_queue(&self, name: &str) -> bool {
        self.lock().queues.contains_key(name)
    }

    /// Messages waiting in `queue`, not yet delivered.
    pub fn ready_count(&self, queue: &str) -> usize {
        self.lock().queues.get(queue).map_or(0, |q| q.ready.len())
    }

    /// Messages delivered from `queue` and not yet settled.
    pub fn unacked_count(&self, queue: &str) -> usize {
        self.lock().queues.get(queue).map_or(0, |q| q.unacked.len())
    }

    pub fn consumer_count(&self, queue: &str) -> usize {
        self.lock().queues.get(queue).map_or(0, |q| q.consumers.len())
    }

    /// Every message accepted so far, in publish order.
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.lock().published.clone()
    }

    /// Publishes from outside any connection, like another service would.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Transport`] if the exchange does not exist.
    pub fn inject(&self, exchange: &str, routing_key: &str, body: &[u8]) -> Result<(), BrokerError> {
        self.lock().route(
            exchange,
            routing_key,
            Message {
                body: body.to_vec(),
                redelivered: false,
            },
        )
    }
}

/// Dials a [`MemoryBroker`]; the URL is ignored.
#[derive(Clone)]
pub struct MemoryDialer {
    broker: MemoryBroker,
}

#[async_trait]
impl Dialer for MemoryDialer {
    async fn dial(&self, _url: &str) -> Result<Arc<dyn BrokerConnection>, BrokerError> {
        let mut state = self.broker.lock();
        state.dial_attempts += 1;
        if state.offline {
            return Err(BrokerError::Transport("broker unreachable".to_string()));
        }
        let id = state.next_id();
        let closed = CancellationToken::new();
        state.open_connections.insert(id, closed.clone());
        Ok(Arc::new(MemoryConnection {
            broker: self.broker.clone(),
            id,
            closed,
        }))
    }
}

struct MemoryConnection {
    broker: MemoryBroker,
    id: u64,
    closed: CancellationToken,
}

#[async_trait]
impl BrokerConnection for MemoryConnection {
    async fn open_channel(&self) -> Result<Arc<dyn BrokerChannel>, BrokerError> {
        self.broker.lock().ensure_open(self.id)?;
        Ok(Arc::new(MemoryChannel {
            broker: self.broker.clone(),
            connection: self.id,
        }))
    }

    async fn closed(&self) -> BrokerError {
        self.closed.cancelled().await;
        BrokerError::ConnectionClosed("connection dropped".to_string())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        let mut state = self.broker.lock();
        if state.open_connections.remove(&self.id).is_none() {
            return Ok(());
        }
        let id = self.id;
        let names: Vec<String> = state.queues.keys().cloned().collect();
        for name in &names {
            if let Some(queue) = state.queues.get_mut(name) {
                queue.consumers.retain(|c| c.connection != id);
                State::requeue(queue, |u| u.connection != id);
            }
        }
        for name in &names {
            state.pump(name);
        }
        Ok(())
    }
}

struct MemoryChannel {
    broker: MemoryBroker,
    connection: u64,
}

#[async_trait]
impl BrokerChannel for MemoryChannel {
    async fn declare_exchange(&self, spec: &ExchangeSpec) -> Result<(), BrokerError> {
        let mut state = self.broker.lock();
        state.ensure_open(self.connection)?;
        match state.exchanges.get(&spec.name) {
            Some(kind) if *kind != spec.kind => Err(BrokerError::Transport(format!(
                "exchange '{}' redeclared with another type",
                spec.name
            ))),
            Some(_) => Ok(()),
            None => {
                state.exchanges.insert(spec.name.clone(), spec.kind);
                Ok(())
            }
        }
    }

    async fn declare_queue(&self, spec: &QueueSpec) -> Result<(), BrokerError> {
        let mut state = self.broker.lock();
        state.ensure_open(self.connection)?;
        state
            .queues
            .entry(spec.name.clone())
            .or_insert_with(|| Queue {
                dead_letter_exchange: spec.dead_letter_exchange.clone(),
                ..Queue::default()
            });
        Ok(())
    }

    async fn bind_queue(&self, spec: &BindingSpec) -> Result<(), BrokerError> {
        let mut state = self.broker.lock();
        state.ensure_open(self.connection)?;
        if !state.exchanges.contains_key(&spec.exchange) {
            return Err(BrokerError::Transport(format!(
                "no exchange '{}'",
                spec.exchange
            )));
        }
        if !state.queues.contains_key(&spec.queue) {
            return Err(BrokerError::Transport(format!("no queue '{}'", spec.queue)));
        }
        if !state.bindings.contains(spec) {
            state.bindings.push(spec.clone());
        }
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        options: &ConsumeOptions,
    ) -> Result<Consumption, BrokerError> {
        let mut state = self.broker.lock();
        state.ensure_open(self.connection)?;
        let id = state.next_id();
        let tag = options
            .tag
            .clone()
            .unwrap_or_else(|| format!("ctag-{id}"));

        let (tx, rx) = mpsc::unbounded_channel();
        let slot = ConsumerSlot {
            tag: tag.clone(),
            connection: self.connection,
            prefetch: options.prefetch.map(usize::from),
            tx,
        };
        state
            .queues
            .get_mut(queue)
            .ok_or_else(|| BrokerError::Transport(format!("no queue '{queue}'")))?
            .consumers
            .push(slot);
        state.pump(queue);

        let deliveries = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed();
        Ok(Consumption { tag, deliveries })
    }

    async fn cancel(&self, consumer_tag: &str) -> Result<(), BrokerError> {
        let mut state = self.broker.lock();
        state.ensure_open(self.connection)?;
        let names: Vec<String> = state.queues.keys().cloned().collect();
        for name in &names {
            if let Some(queue) = state.queues.get_mut(name) {
                queue.consumers.retain(|c| c.tag != consumer_tag);
                State::requeue(queue, |u| u.consumer != consumer_tag);
            }
        }
        for name in &names {
            state.pump(name);
        }
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
    ) -> Result<(), BrokerError> {
        let mut state = self.broker.lock();
        state.ensure_open(self.connection)?;
        if state.nack_next_publishes > 0 {
            state.nack_next_publishes -= 1;
            return Err(BrokerError::PublishNacked {
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
            });
        }
        state.route(
            exchange,
            routing_key,
            Message {
                body: body.to_vec(),
                redelivered: false,
            },
        )?;
        state.published.push(PublishedMessage {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            body: body.to_vec(),
        });
        Ok(())
    }
}

struct MemoryAcker {
    state: Weak<Mutex<State>>,
    queue: String,
    tag: u64,
}

impl MemoryAcker {
    fn settle(&self, requeue: Option<bool>) -> Result<(), BrokerError> {
        let state = self
            .state
            .upgrade()
            .ok_or_else(|| BrokerError::ConnectionClosed("broker gone".to_string()))?;
        let mut state = state.lock().unwrap_or_else(|p| p.into_inner());

        let queue = state
            .queues
            .get_mut(&self.queue)
            .ok_or_else(|| BrokerError::Transport(format!("no queue '{}'", self.queue)))?;
        let unacked = queue.unacked.remove(&self.tag).ok_or_else(|| {
            BrokerError::ConnectionClosed(format!("unknown delivery tag {}", self.tag))
        })?;
        let dead_letter = queue.dead_letter_exchange.clone();

        match requeue {
            None => {}
            Some(true) => {
                let mut message = unacked.message;
                message.redelivered = true;
                queue.ready.push_front(message);
            }
            Some(false) => {
                if let Some(exchange) = dead_letter {
                    let message = Message {
                        body: unacked.message.body,
                        redelivered: false,
                    };
                    state.route(&exchange, &self.queue, message)?;
                }
            }
        }
        state.pump(&self.queue);
        Ok(())
    }
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn ack(&self) -> Result<(), BrokerError> {
        self.settle(None)
    }

    async fn nack(&self, requeue: bool) -> Result<(), BrokerError> {
        self.settle(Some(requeue))
    }
}
