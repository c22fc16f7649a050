//! Per-queue consumer tasks with manual acknowledgement.

use async_trait::async_trait;
use futures_util::StreamExt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::topology::ConsumeOptions;
use super::transport::{BrokerChannel, Consumption, Delivery};
use crate::error::HandlerError;

/// Application callback invoked for every delivery of a queue.
///
/// `Ok` acks the delivery. An error nacks it: permanent errors are never
/// requeued, transient ones follow [`ConsumeOptions::requeue_on_nack`].
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, body: &[u8]) -> Result<(), HandlerError>;
}

/// A running consumer task.
pub(crate) struct ConsumerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ConsumerHandle {
    /// Cancels the task and waits until it has stopped.
    pub(crate) async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "consumer task ended abnormally");
        }
    }
}

pub(crate) fn spawn_consumer(
    queue: String,
    channel: Arc<dyn BrokerChannel>,
    consumption: Consumption,
    handler: Arc<dyn MessageHandler>,
    options: ConsumeOptions,
    cancel: CancellationToken,
) -> ConsumerHandle {
    let task = tokio::spawn(run_consumer(
        queue,
        channel,
        consumption,
        handler,
        options,
        cancel.clone(),
    ));
    ConsumerHandle { cancel, task }
}

async fn run_consumer(
    queue: String,
    channel: Arc<dyn BrokerChannel>,
    consumption: Consumption,
    handler: Arc<dyn MessageHandler>,
    options: ConsumeOptions,
    cancel: CancellationToken,
) {
    let Consumption {
        tag,
        mut deliveries,
    } = consumption;
    info!(queue = %queue, tag = %tag, "consumer started");

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = deliveries.next() => next,
        };

        let delivery = match next {
            Some(Ok(delivery)) => delivery,
            Some(Err(e)) => {
                warn!(queue = %queue, error = %e, "delivery stream failed");
                return;
            }
            None => {
                debug!(queue = %queue, "delivery stream ended");
                return;
            }
        };

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                // Hand the message back right away instead of leaving it
                // unacked until the channel closes.
                if let Err(e) = delivery.nack(true).await {
                    debug!(queue = %queue, error = %e, "nack of in-flight delivery failed");
                }
                break;
            }
            outcome = handler.handle(&delivery.body) => outcome,
        };

        settle(&queue, &delivery, outcome, &options).await;
    }

    if let Err(e) = channel.cancel(&tag).await {
        debug!(queue = %queue, tag = %tag, error = %e, "basic.cancel failed");
    }
    info!(queue = %queue, tag = %tag, "consumer stopped");
}

async fn settle(
    queue: &str,
    delivery: &Delivery,
    outcome: Result<(), HandlerError>,
    options: &ConsumeOptions,
) {
    match outcome {
        Ok(()) => {
            metrics::counter!("consumer_acked_total", "queue" => queue.to_string()).increment(1);
            if let Err(e) = delivery.ack().await {
                warn!(queue = %queue, error = %e, "ack failed; broker will redeliver");
            }
        }
        Err(e) => {
            let requeue = !e.is_permanent() && options.requeue_on_nack;
            error!(
                queue = %queue,
                error = %e,
                requeue,
                redelivered = delivery.redelivered,
                "handler failed"
            );
            metrics::counter!("consumer_nacked_total", "queue" => queue.to_string()).increment(1);
            if let Err(e) = delivery.nack(requeue).await {
                warn!(queue = %queue, error = %e, "nack failed; broker will redeliver");
            }
        }
    }
}
