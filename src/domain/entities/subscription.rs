//! Subscription entity owned by the subscription service.

use chrono::{DateTime, Utc};

/// A user's subscription.
///
/// `checked_at` is stamped once the expiry watcher has emitted a
/// `subscription-expired` event for the current expiry.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Subscription {
    pub id: i64,
    pub user_id: i64,
    pub expired_at: DateTime<Utc>,
    pub checked_at: Option<DateTime<Utc>>,
}

impl Subscription {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expired_at <= now
    }
}
