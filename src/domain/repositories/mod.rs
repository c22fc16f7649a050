//! Repository trait definitions for the domain layer.
//!
//! Traits define the contract for data operations; implementations live in
//! `crate::infrastructure::persistence`. Mock implementations are generated
//! via `mockall` for unit tests.
//!
//! # Available Repositories
//!
//! - [`AccountRepository`] - User registration
//! - [`LinkRepository`] - Links, perk activation and quota enforcement
//! - [`SubscriptionRepository`] - Subscriptions and expiry tracking
//! - [`OutboxRepository`] - Poll side of each outbox table
//!
//! # Testing
//!
//! See integration tests in `tests/repository_*.rs` for usage examples.

pub mod account_repository;
pub mod link_repository;
pub mod outbox_repository;
pub mod subscription_repository;

pub use account_repository::AccountRepository;
pub use link_repository::LinkRepository;
pub use outbox_repository::OutboxRepository;
pub use subscription_repository::{NewSubscriptionCheck, SubscriptionRepository};

#[cfg(test)]
pub use account_repository::MockAccountRepository;
#[cfg(test)]
pub use link_repository::MockLinkRepository;
#[cfg(test)]
pub use outbox_repository::MockOutboxRepository;
#[cfg(test)]
pub use subscription_repository::MockSubscriptionRepository;
