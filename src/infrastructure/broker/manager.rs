//! Broker connection supervisor and topology owner.
//!
//! [`ConnectionManager`] holds the single live connection, the channels
//! opened on it and a [`TopologyRegistry`] of everything applied so far.
//! When the connection drops it redials with exponential backoff and
//! replays the registry on the new connection: channels, exchanges, queues,
//! bindings and finally consumers with their original handlers and options.
//!
//! Topology and channel handles live behind one reader/writer lock.
//! Publishes take it shared; replay takes it exclusively, so publishes wait
//! while a reconnect is being restored.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_retry::strategy::ExponentialBackoff;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::consumer::{ConsumerHandle, MessageHandler, spawn_consumer};
use super::topology::{
    BindingSpec, ConsumeOptions, ConsumerRegistration, ExchangeSpec, QueueSpec, TopologyRegistry,
};
use super::transport::{BrokerChannel, BrokerConnection, Dialer};
use crate::error::BrokerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        }
    }
}

/// Redial delays: `initial`, doubling, capped at `max`.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl BackoffPolicy {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max }
    }

    /// Infinite redial delay sequence.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + use<> {
        // ExponentialBackoff yields factor * base^n ms, starting at n = 1.
        let factor = (self.initial.as_millis() as u64 / 2).max(1);
        ExponentialBackoff::from_millis(2)
            .factor(factor)
            .max_delay(self.max)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(16))
    }
}

struct Live {
    connection: Arc<dyn BrokerConnection>,
    channels: HashMap<String, Arc<dyn BrokerChannel>>,
}

#[derive(Default)]
struct Topology {
    registry: TopologyRegistry,
    live: Option<Live>,
}

impl Topology {
    fn channel(&self, name: &str) -> Result<Arc<dyn BrokerChannel>, BrokerError> {
        let live = self.live.as_ref().ok_or(BrokerError::NotConnected)?;
        if !self.registry.has_channel(name) {
            return Err(BrokerError::ChannelNotRegistered(name.to_string()));
        }
        live.channels
            .get(name)
            .cloned()
            .ok_or_else(|| BrokerError::ChannelNotRegistered(name.to_string()))
    }
}

struct Inner {
    dialer: Arc<dyn Dialer>,
    backoff: BackoffPolicy,
    state: watch::Sender<ConnectionState>,
    topology: RwLock<Topology>,
    consumers: Mutex<HashMap<String, ConsumerHandle>>,
    shutdown: CancellationToken,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

/// Owns the broker connection, its channels and the consumer tasks.
///
/// Cheap to clone; clones share the same connection.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    pub fn new(dialer: Arc<dyn Dialer>, backoff: BackoffPolicy) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                dialer,
                backoff,
                state,
                topology: RwLock::new(Topology::default()),
                consumers: Mutex::new(HashMap::new()),
                shutdown: CancellationToken::new(),
                supervisor: Mutex::new(None),
            }),
        }
    }

    /// Starts the supervisor task.
    ///
    /// The returned receiver resolves once, on the first successful
    /// connection. It is dropped without a value if the manager is stopped
    /// before ever connecting.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::AlreadyStarted`] on a second call.
    pub async fn start(&self, url: impl Into<String>) -> Result<oneshot::Receiver<()>, BrokerError> {
        let mut supervisor = self.inner.supervisor.lock().await;
        if supervisor.is_some() || self.inner.shutdown.is_cancelled() {
            return Err(BrokerError::AlreadyStarted);
        }

        let (ready_tx, ready_rx) = oneshot::channel();
        let inner = self.inner.clone();
        let url = url.into();
        *supervisor = Some(tokio::spawn(async move {
            inner.supervise(url, ready_tx).await;
        }));
        Ok(ready_rx)
    }

    /// Stops the supervisor and every consumer, then closes the connection.
    pub async fn stop(&self) {
        self.inner.shutdown.cancel();

        let supervisor = self.inner.supervisor.lock().await.take();
        if let Some(task) = supervisor
            && let Err(e) = task.await
        {
            warn!(error = %e, "broker supervisor ended abnormally");
        }

        self.inner.stop_consumers().await;
        let live = self.inner.topology.write().await.live.take();
        if let Some(live) = live
            && let Err(e) = live.connection.close().await
        {
            debug!(error = %e, "closing broker connection failed");
        }
        self.inner.state.send_replace(ConnectionState::Disconnected);
        info!("broker connection manager stopped");
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Waits until the manager reaches `state`.
    pub async fn wait_for_state(&self, state: ConnectionState) {
        let mut rx = self.inner.state.subscribe();
        // The sender lives as long as `self`.
        let _ = rx.wait_for(|s| *s == state).await;
    }

    /// Opens a named channel. Opening an already open channel is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::NotConnected`] when there is no live connection.
    pub async fn add_channel(&self, name: &str) -> Result<(), BrokerError> {
        let mut topology = self.inner.topology.write().await;
        let live = topology.live.as_mut().ok_or(BrokerError::NotConnected)?;
        if !live.channels.contains_key(name) {
            let channel = live.connection.open_channel().await?;
            live.channels.insert(name.to_string(), channel);
        }
        topology.registry.record_channel(name);
        debug!(channel = %name, "channel opened");
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`BrokerError::NotConnected`] or
    /// [`BrokerError::ChannelNotRegistered`], or the broker's refusal.
    pub async fn add_exchange(&self, channel: &str, spec: ExchangeSpec) -> Result<(), BrokerError> {
        let mut topology = self.inner.topology.write().await;
        topology.channel(channel)?.declare_exchange(&spec).await?;
        debug!(exchange = %spec.name, kind = ?spec.kind, "exchange declared");
        topology.registry.record_exchange(channel, spec);
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`BrokerError::NotConnected`] or
    /// [`BrokerError::ChannelNotRegistered`], or the broker's refusal.
    pub async fn add_queue(&self, channel: &str, spec: QueueSpec) -> Result<(), BrokerError> {
        let mut topology = self.inner.topology.write().await;
        topology.channel(channel)?.declare_queue(&spec).await?;
        debug!(queue = %spec.name, "queue declared");
        topology.registry.record_queue(channel, spec);
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`BrokerError::NotConnected`] or
    /// [`BrokerError::ChannelNotRegistered`], or the broker's refusal.
    pub async fn bind_queue(&self, channel: &str, spec: BindingSpec) -> Result<(), BrokerError> {
        let mut topology = self.inner.topology.write().await;
        topology.channel(channel)?.bind_queue(&spec).await?;
        debug!(queue = %spec.queue, exchange = %spec.exchange, key = %spec.routing_key, "queue bound");
        topology.registry.record_binding(channel, spec);
        Ok(())
    }

    /// Starts consuming `queue` with `handler`.
    ///
    /// A consumer already registered for the same queue is cancelled and
    /// awaited before the new one starts.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::NotConnected`] or
    /// [`BrokerError::ChannelNotRegistered`], or the broker's refusal.
    pub async fn add_consumer(
        &self,
        channel: &str,
        queue: &str,
        handler: Arc<dyn MessageHandler>,
        options: ConsumeOptions,
    ) -> Result<(), BrokerError> {
        let mut topology = self.inner.topology.write().await;
        let broker_channel = topology.channel(channel)?;
        let registration = ConsumerRegistration {
            channel: channel.to_string(),
            queue: queue.to_string(),
            handler,
            options,
        };
        self.inner
            .start_consumer(broker_channel, &registration)
            .await?;
        topology.registry.record_consumer(registration);
        Ok(())
    }

    /// Publishes on a registered channel and waits for the broker's confirm.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::NotConnected`],
    /// [`BrokerError::ChannelNotRegistered`] or
    /// [`BrokerError::PublishNacked`], or a transport failure.
    pub async fn publish(
        &self,
        channel: &str,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
    ) -> Result<(), BrokerError> {
        let broker_channel = self.inner.topology.read().await.channel(channel)?;
        broker_channel.publish(exchange, routing_key, body).await
    }
}

impl Inner {
    async fn supervise(self: Arc<Self>, url: String, ready: oneshot::Sender<()>) {
        let mut ready = Some(ready);
        // One schedule spans dial failures and failed replays; only a fully
        // restored connection starts it over.
        let mut delays = self.backoff.delays();
        let mut first_attempt = true;

        loop {
            if !first_attempt {
                let delay = delays.next().unwrap_or(self.backoff.max);
                debug!(delay_ms = delay.as_millis() as u64, "waiting before redial");
                tokio::select! {
                    _ = self.shutdown.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            first_attempt = false;

            self.state.send_replace(ConnectionState::Connecting);
            let dialed = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                dialed = self.dialer.dial(&url) => dialed,
            };
            let connection = match dialed {
                Ok(connection) => connection,
                Err(e) => {
                    warn!(error = %e, "broker dial failed");
                    self.state.send_replace(ConnectionState::Disconnected);
                    continue;
                }
            };

            if let Err(e) = self.restore(connection.clone()).await {
                error!(error = %e, "topology replay failed, redialing");
                if let Err(e) = connection.close().await {
                    debug!(error = %e, "closing half-restored connection failed");
                }
                self.detach().await;
                continue;
            }
            delays = self.backoff.delays();

            self.state.send_replace(ConnectionState::Connected);
            if let Some(tx) = ready.take() {
                info!("broker connection ready");
                let _ = tx.send(());
            } else {
                info!("broker connection restored");
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                reason = connection.closed() => {
                    warn!(error = %reason, "broker connection lost");
                    metrics::counter!("broker_reconnects_total").increment(1);
                    self.detach().await;
                }
            }
        }
        debug!("broker supervisor exiting");
    }

    /// Replays the registry on a fresh connection.
    async fn restore(&self, connection: Arc<dyn BrokerConnection>) -> Result<(), BrokerError> {
        let mut topology = self.topology.write().await;

        let mut channels = HashMap::new();
        for name in topology.registry.channels() {
            channels.insert(name.clone(), connection.open_channel().await?);
        }
        let channel = |name: &str| {
            channels
                .get(name)
                .cloned()
                .ok_or_else(|| BrokerError::ChannelNotRegistered(name.to_string()))
        };

        for (name, spec) in topology.registry.exchanges() {
            channel(name)?.declare_exchange(spec).await?;
        }
        for (name, spec) in topology.registry.queues() {
            channel(name)?.declare_queue(spec).await?;
        }
        for (name, spec) in topology.registry.bindings() {
            channel(name)?.bind_queue(spec).await?;
        }
        for registration in topology.registry.consumers() {
            self.start_consumer(channel(&registration.channel)?, registration)
                .await?;
        }

        debug!(
            channels = topology.registry.channels().len(),
            exchanges = topology.registry.exchanges().len(),
            queues = topology.registry.queues().len(),
            bindings = topology.registry.bindings().len(),
            consumers = topology.registry.consumers().len(),
            "topology replayed"
        );
        topology.live = Some(Live {
            connection,
            channels,
        });
        Ok(())
    }

    async fn start_consumer(
        &self,
        channel: Arc<dyn BrokerChannel>,
        registration: &ConsumerRegistration,
    ) -> Result<(), BrokerError> {
        let mut consumers = self.consumers.lock().await;
        if let Some(previous) = consumers.remove(&registration.queue) {
            debug!(queue = %registration.queue, "replacing consumer");
            previous.stop().await;
        }

        let consumption = channel
            .consume(&registration.queue, &registration.options)
            .await?;
        let handle = spawn_consumer(
            registration.queue.clone(),
            channel,
            consumption,
            registration.handler.clone(),
            registration.options.clone(),
            self.shutdown.child_token(),
        );
        consumers.insert(registration.queue.clone(), handle);
        Ok(())
    }

    /// Forgets the dead connection and its consumers; the registry stays.
    async fn detach(&self) {
        self.state.send_replace(ConnectionState::Disconnected);
        self.topology.write().await.live = None;
        self.stop_consumers().await;
    }

    async fn stop_consumers(&self) {
        let handles: Vec<_> = self.consumers.lock().await.drain().collect();
        for (queue, handle) in handles {
            debug!(queue = %queue, "stopping consumer");
            handle.stop().await;
        }
    }
}
