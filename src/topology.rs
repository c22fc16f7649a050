//! Broker topology of the service.
//!
//! - `dead.letter` fanout exchange bound to the `dead.letter` queue
//! - durable work queues, each dead-lettering to `dead.letter`:
//!   `create.subscription`, `check.subscription`, `finish.shortening`,
//!   `link.subscription.expired`
//! - `subscription.expired` fanout exchange bound to `link.subscription.expired`
//!
//! Declarations run on the `default` channel, outbox publishing on the
//! `publisher` channel, and every consumer gets a channel named after its
//! queue.

use std::sync::Arc;

use crate::domain::events::names;
use crate::error::BrokerError;
use crate::infrastructure::broker::{
    BindingSpec, ConnectionManager, ConsumeOptions, ExchangeSpec, MessageHandler, QueueSpec,
};

/// Work queues and their consumer handlers.
pub struct Listeners {
    pub create_subscription: Arc<dyn MessageHandler>,
    pub check_subscription: Arc<dyn MessageHandler>,
    pub finish_shortening: Arc<dyn MessageHandler>,
    pub subscription_expired: Arc<dyn MessageHandler>,
}

pub const WORK_QUEUES: &[&str] = &[
    names::CREATE_SUBSCRIPTION_QUEUE,
    names::CHECK_SUBSCRIPTION_QUEUE,
    names::FINISH_SHORTENING_QUEUE,
    names::LINK_SUBSCRIPTION_EXPIRED_QUEUE,
];

/// Opens the shared channels and declares exchanges, queues and bindings.
///
/// # Errors
///
/// Returns the first [`BrokerError`]; at startup this is fatal.
pub async fn declare(manager: &ConnectionManager) -> Result<(), BrokerError> {
    manager.add_channel(names::DEFAULT_CHANNEL).await?;
    manager.add_channel(names::PUBLISHER_CHANNEL).await?;

    let channel = names::DEFAULT_CHANNEL;

    manager
        .add_exchange(channel, ExchangeSpec::fanout(names::DEAD_LETTER_EXCHANGE))
        .await?;
    manager
        .add_queue(channel, QueueSpec::durable(names::DEAD_LETTER_QUEUE))
        .await?;
    manager
        .bind_queue(
            channel,
            BindingSpec::new(names::DEAD_LETTER_QUEUE, names::DEAD_LETTER_EXCHANGE, ""),
        )
        .await?;

    for queue in WORK_QUEUES {
        manager
            .add_queue(
                channel,
                QueueSpec::durable(*queue).with_dead_letter(names::DEAD_LETTER_EXCHANGE),
            )
            .await?;
    }

    manager
        .add_exchange(
            channel,
            ExchangeSpec::fanout(names::SUBSCRIPTION_EXPIRED_EXCHANGE),
        )
        .await?;
    manager
        .bind_queue(
            channel,
            BindingSpec::new(
                names::LINK_SUBSCRIPTION_EXPIRED_QUEUE,
                names::SUBSCRIPTION_EXPIRED_EXCHANGE,
                "",
            ),
        )
        .await?;

    tracing::info!(queues = WORK_QUEUES.len(), "broker topology declared");
    Ok(())
}

/// Starts one consumer per work queue, each on its own channel.
///
/// # Errors
///
/// Returns the first [`BrokerError`]; at startup this is fatal.
pub async fn attach_consumers(
    manager: &ConnectionManager,
    listeners: Listeners,
    prefetch: u16,
) -> Result<(), BrokerError> {
    let handlers = [
        (names::CREATE_SUBSCRIPTION_QUEUE, listeners.create_subscription),
        (names::CHECK_SUBSCRIPTION_QUEUE, listeners.check_subscription),
        (names::FINISH_SHORTENING_QUEUE, listeners.finish_shortening),
        (
            names::LINK_SUBSCRIPTION_EXPIRED_QUEUE,
            listeners.subscription_expired,
        ),
    ];

    for (queue, handler) in handlers {
        manager.add_channel(queue).await?;
        let options = ConsumeOptions {
            prefetch: Some(prefetch),
            ..ConsumeOptions::default()
        };
        manager.add_consumer(queue, queue, handler, options).await?;
    }
    Ok(())
}
