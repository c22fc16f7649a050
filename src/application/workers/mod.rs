//! Background loops.
//!
//! - [`outbox_publisher`] - Publishes pending outbox rows
//! - [`expiry_watcher`] - Turns lapsed subscriptions into outbox rows

pub mod expiry_watcher;
pub mod outbox_publisher;

pub use expiry_watcher::{ExpiryWatcher, WatcherSettings};
pub use outbox_publisher::{BatchOutcome, OutboxPublisher, PublisherSettings};
