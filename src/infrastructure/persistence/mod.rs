//! PostgreSQL repository implementations.
//!
//! Queries go through SQLx prepared statements. Writes that produce a fact
//! enqueue the matching outbox row in the same transaction.
//!
//! # Repositories
//!
//! - [`PgAccountRepository`] - Users and registration outbox
//! - [`PgLinkRepository`] - Links, perk activation and quota enforcement
//! - [`PgSubscriptionRepository`] - Subscriptions, checks and expiry
//! - [`PgOutboxRepository`] - Poll side of every outbox table

pub mod pg_account_repository;
pub mod pg_link_repository;
pub mod pg_outbox_repository;
pub mod pg_subscription_repository;

pub use pg_account_repository::PgAccountRepository;
pub use pg_link_repository::PgLinkRepository;
pub use pg_outbox_repository::{OutboxTable, PgOutboxRepository};
pub use pg_subscription_repository::PgSubscriptionRepository;
