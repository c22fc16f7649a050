//! Outbox publisher loop.
//!
//! One loop runs per outbox table. Each tick fetches a batch of pending rows,
//! publishes their messages in order and resolves the whole batch only after
//! every publish was confirmed. The first failed publish aborts the batch;
//! its rows stay pending and are retried on the next tick, including the ones
//! already published. Consumers are idempotent, so the duplicates are safe.

use serde_json::json;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::outbox::{BatchLimit, EventPublisher, OutboxEvent};
use crate::domain::repositories::OutboxRepository;
use crate::error::AppError;

#[derive(Debug, Clone, Copy)]
pub struct PublisherSettings {
    pub interval: Duration,
    pub batch_size: u32,
}

impl Default for PublisherSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(2000),
            batch_size: 20,
        }
    }
}

/// Result of one pass over an outbox table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    Empty,
    Published { rows: usize, messages: usize },
    /// A publish failed after `published` messages went out; nothing resolved.
    Aborted { published: usize },
}

pub struct OutboxPublisher<R, O, P> {
    outbox: Arc<O>,
    publisher: Arc<P>,
    settings: PublisherSettings,
    _row: PhantomData<fn() -> R>,
}

impl<R, O, P> OutboxPublisher<R, O, P>
where
    R: OutboxEvent,
    O: OutboxRepository<R>,
    P: EventPublisher,
{
    pub fn new(outbox: Arc<O>, publisher: Arc<P>, settings: PublisherSettings) -> Self {
        Self {
            outbox,
            publisher,
            settings,
            _row: PhantomData,
        }
    }

    /// Publishes one batch of pending rows.
    ///
    /// # Errors
    ///
    /// Returns an [`AppError`] if the outbox cannot be read or resolved, or a
    /// row cannot be encoded. Publish failures are not errors; they yield
    /// [`BatchOutcome::Aborted`].
    pub async fn publish_once(&self, limit: BatchLimit) -> Result<BatchOutcome, AppError> {
        let rows = self.outbox.fetch_pending(limit).await?;
        if rows.is_empty() {
            return Ok(BatchOutcome::Empty);
        }

        let messages = R::encode_batch(&rows).map_err(|e| {
            AppError::internal(
                "Failed to encode outbox batch",
                json!({ "event": R::NAME, "reason": e.to_string() }),
            )
        })?;

        for (published, message) in messages.iter().enumerate() {
            if let Err(e) = self.publisher.publish(message).await {
                metrics::counter!("outbox_publish_failures_total", "event" => R::NAME).increment(1);
                warn!(
                    event = R::NAME,
                    exchange = message.exchange,
                    routing_key = message.routing_key,
                    published,
                    error = %e,
                    "publish failed, batch left pending"
                );
                return Ok(BatchOutcome::Aborted { published });
            }
        }

        let ids: Vec<i64> = rows.iter().map(OutboxEvent::id).collect();
        self.outbox.resolve(&ids).await?;

        metrics::counter!("outbox_published_total", "event" => R::NAME)
            .increment(messages.len() as u64);
        debug!(event = R::NAME, rows = rows.len(), messages = messages.len(), "outbox batch published");

        Ok(BatchOutcome::Published {
            rows: rows.len(),
            messages: messages.len(),
        })
    }

    /// Drains the whole backlog once, then publishes bounded batches on every
    /// tick until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            event = R::NAME,
            interval_ms = self.settings.interval.as_millis() as u64,
            batch_size = self.settings.batch_size,
            "outbox publisher started"
        );

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = self.tick(BatchLimit::Unbounded) => {}
        }

        let mut interval = tokio::time::interval(self.settings.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    self.tick(BatchLimit::Bounded(self.settings.batch_size)).await;
                }
            }
        }
        info!(event = R::NAME, "outbox publisher stopped");
    }

    async fn tick(&self, limit: BatchLimit) {
        match self.publish_once(limit).await {
            Ok(BatchOutcome::Published { rows, .. }) if limit == BatchLimit::Unbounded => {
                info!(event = R::NAME, rows, "outbox backlog drained");
            }
            Ok(_) => {}
            Err(e) => error!(event = R::NAME, error = %e, "outbox pass failed"),
        }
    }
}
