//! Transactional outbox rows and their translation into broker messages.
//!
//! A row is written in the same database transaction as the state change it
//! describes. The publisher loop later reads pending rows, turns them into
//! [`OutboundMessage`]s and flips them to done once every message of the
//! batch was confirmed by the broker.

use async_trait::async_trait;
use chrono::Duration;

use crate::domain::events::messages::{
    SOURCE_CHECK_SUBSCRIPTION, SOURCE_SUBSCRIPTION_WATCHER, SOURCE_USER_REGISTERED,
    USECASE_LINK_SHORTENED,
};
use crate::domain::events::{
    CheckSubscription, CreateSubscription, Envelope, EnvelopeError, FinishShortening, PerkGrant,
    QuotaPerk, SubscriptionExpired, names,
};
use crate::error::BrokerError;

/// Upper bound on rows fetched from an outbox in one pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchLimit {
    Bounded(u32),
    /// Drains the whole backlog.
    Unbounded,
}

impl BatchLimit {
    /// Value bound to `LIMIT $n`; PostgreSQL reads `LIMIT NULL` as no limit.
    pub fn as_sql(self) -> Option<i64> {
        match self {
            BatchLimit::Bounded(n) => Some(i64::from(n)),
            BatchLimit::Unbounded => None,
        }
    }
}

/// A serialized event ready to be published.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub event: &'static str,
    pub exchange: &'static str,
    pub routing_key: &'static str,
    pub body: Vec<u8>,
}

/// Port used by the publisher loop to hand messages to the broker.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publishes one message and waits for the broker's confirmation.
    ///
    /// # Errors
    ///
    /// Returns a [`BrokerError`] when the broker is unreachable or rejects
    /// the message.
    async fn publish(&self, message: &OutboundMessage) -> Result<(), BrokerError>;
}

/// A pending outbox row.
pub trait OutboxEvent: Sized + Send + Sync + 'static {
    /// Name used in logs and metrics.
    const NAME: &'static str;

    fn id(&self) -> i64;

    fn to_message(&self) -> Result<OutboundMessage, EnvelopeError>;

    /// Encodes a whole batch. One message per row unless overridden.
    fn encode_batch(rows: &[Self]) -> Result<Vec<OutboundMessage>, EnvelopeError> {
        rows.iter().map(Self::to_message).collect()
    }
}

/// `register_outbox`: a freshly registered user.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct UserRegistered {
    pub id: i64,
    pub user_id: i64,
}

impl OutboxEvent for UserRegistered {
    const NAME: &'static str = "create-subscription";

    fn id(&self) -> i64 {
        self.id
    }

    fn to_message(&self) -> Result<OutboundMessage, EnvelopeError> {
        create_subscription(vec![self.user_id])
    }

    /// Registrations are folded into a single `create-subscription`.
    fn encode_batch(rows: &[Self]) -> Result<Vec<OutboundMessage>, EnvelopeError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let users = rows.iter().map(|r| r.user_id).collect();
        Ok(vec![create_subscription(users)?])
    }
}

fn create_subscription(users: Vec<i64>) -> Result<OutboundMessage, EnvelopeError> {
    let body = Envelope::new(CreateSubscription { users })
        .with_source(SOURCE_USER_REGISTERED)
        .to_bytes()?;
    Ok(OutboundMessage {
        event: UserRegistered::NAME,
        exchange: names::DEFAULT_EXCHANGE,
        routing_key: names::CREATE_SUBSCRIPTION_QUEUE,
        body,
    })
}

/// `link_shortened_outbox`: a link waiting for its perk.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct LinkShortened {
    pub id: i64,
    pub user_id: i64,
    pub link_id: i64,
}

impl OutboxEvent for LinkShortened {
    const NAME: &'static str = "check-subscription";

    fn id(&self) -> i64 {
        self.id
    }

    fn to_message(&self) -> Result<OutboundMessage, EnvelopeError> {
        let body = Envelope::new(CheckSubscription {
            id: self.id,
            context_id: self.link_id,
            user_id: self.user_id,
            usecase: USECASE_LINK_SHORTENED.to_string(),
        })
        .with_source(USECASE_LINK_SHORTENED)
        .to_bytes()?;
        Ok(OutboundMessage {
            event: Self::NAME,
            exchange: names::DEFAULT_EXCHANGE,
            routing_key: names::CHECK_SUBSCRIPTION_QUEUE,
            body,
        })
    }
}

/// `subscription_checked_outbox`: the perk resolved for a checked context.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct SubscriptionChecked {
    pub id: i64,
    pub context_id: i64,
    pub usecase: String,
    pub lifetime_ns: i64,
    pub link_limit: i64,
    pub allow_short_edit: bool,
}

impl OutboxEvent for SubscriptionChecked {
    const NAME: &'static str = "finish-shortening";

    fn id(&self) -> i64 {
        self.id
    }

    fn to_message(&self) -> Result<OutboundMessage, EnvelopeError> {
        let body = Envelope::new(FinishShortening {
            id: self.id,
            context_id: self.context_id,
            usecase: self.usecase.clone(),
            perk: PerkGrant {
                limit: self.link_limit,
                lifetime: Duration::nanoseconds(self.lifetime_ns),
                allow_short_edit: self.allow_short_edit,
            },
        })
        .with_source(SOURCE_CHECK_SUBSCRIPTION)
        .to_bytes()?;
        Ok(OutboundMessage {
            event: Self::NAME,
            exchange: names::DEFAULT_EXCHANGE,
            routing_key: names::FINISH_SHORTENING_QUEUE,
            body,
        })
    }
}

/// `subscription_expired_outbox`: a lapsed subscription with the fallback quota.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct SubscriptionLapsed {
    pub id: i64,
    pub user_id: i64,
    pub link_limit: i64,
    pub allow_short_edit: bool,
}

impl OutboxEvent for SubscriptionLapsed {
    const NAME: &'static str = "subscription-expired";

    fn id(&self) -> i64 {
        self.id
    }

    fn to_message(&self) -> Result<OutboundMessage, EnvelopeError> {
        let body = Envelope::new(SubscriptionExpired {
            id: self.id,
            user_id: self.user_id,
            perk: QuotaPerk {
                limit: self.link_limit,
                allow_short_edit: self.allow_short_edit,
            },
        })
        .with_source(SOURCE_SUBSCRIPTION_WATCHER)
        .to_bytes()?;
        Ok(OutboundMessage {
            event: Self::NAME,
            exchange: names::SUBSCRIPTION_EXPIRED_EXCHANGE,
            routing_key: "",
            body,
        })
    }
}
