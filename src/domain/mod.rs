//! Domain layer containing business entities and event contracts.
//!
//! Nothing here depends on the broker, the database or the HTTP surface.
//!
//! - [`entities`] - Users, links, subscriptions and perks
//! - [`events`] - Envelope and payloads exchanged over the broker
//! - [`outbox`] - Outbox rows and the publishing port
//! - [`repositories`] - Data access trait definitions
//!
//! # Event Flow
//!
//! 1. A user registers; a `register_outbox` row is written in the same transaction
//! 2. The outbox publisher sends `create-subscription`; the subscription is bootstrapped
//! 3. A link is shortened; `check-subscription` is sent with the link as context
//! 4. The subscription service answers with `finish-shortening` carrying the perk
//! 5. The link is activated if the user's quota allows it
//! 6. When a subscription lapses, `subscription-expired` shrinks the active set to the fallback quota

pub mod entities;
pub mod events;
pub mod outbox;
pub mod repositories;
