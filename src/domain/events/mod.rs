//! Events exchanged between the account, link and subscription services.
//!
//! Every event travels as an [`Envelope`] whose `data` is one of the payloads
//! in [`messages`]. The broker names in [`names`] are part of the wire
//! contract and must match on both ends.

pub mod envelope;
pub mod messages;

pub use envelope::{ENVELOPE_VERSION, Envelope, EnvelopeError, Meta};
pub use messages::{
    CheckSubscription, CreateSubscription, FinishShortening, PerkGrant, QuotaPerk,
    SubscriptionExpired,
};

/// Exchange, queue and channel names.
pub mod names {
    /// The AMQP default exchange; routes by queue name.
    pub const DEFAULT_EXCHANGE: &str = "";

    pub const CREATE_SUBSCRIPTION_QUEUE: &str = "create.subscription";
    pub const CHECK_SUBSCRIPTION_QUEUE: &str = "check.subscription";
    pub const FINISH_SHORTENING_QUEUE: &str = "finish.shortening";

    /// Fanout exchange for `subscription-expired`.
    pub const SUBSCRIPTION_EXPIRED_EXCHANGE: &str = "subscription.expired";
    /// Queue the link service binds to [`SUBSCRIPTION_EXPIRED_EXCHANGE`].
    pub const LINK_SUBSCRIPTION_EXPIRED_QUEUE: &str = "link.subscription.expired";

    pub const DEAD_LETTER_EXCHANGE: &str = "dead.letter";
    pub const DEAD_LETTER_QUEUE: &str = "dead.letter";

    pub const DEFAULT_CHANNEL: &str = "default";
    pub const PUBLISHER_CHANNEL: &str = "publisher";
}
