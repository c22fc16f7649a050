//! Application layer: services, queue listeners and background workers.
//!
//! Services consume repository traits and hold the business rules. Listeners
//! adapt queue deliveries to service calls; workers drive the outbox
//! publishers and the expiry watcher.
//!
//! - [`services::AccountService`] - Registration
//! - [`services::ShorteningService`] - Link creation, activation and quota
//! - [`services::SubscriptionService`] - Bootstrap, perk checks and expiry

pub mod listeners;
pub mod services;
pub mod workers;
