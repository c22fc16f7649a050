//! Repository trait for subscriptions.

use chrono::{DateTime, Utc};

use crate::domain::entities::{Perk, Subscription};
use crate::domain::events::QuotaPerk;
use crate::domain::outbox::BatchLimit;
use crate::error::AppError;
use async_trait::async_trait;

/// A resolved perk to be sent back to the service that asked for it.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSubscriptionCheck {
    pub context_id: i64,
    pub usecase: String,
    pub perk: Perk,
}

/// Repository interface for subscriptions and their outgoing events.
///
/// # Implementations
///
/// - [`crate::infrastructure::persistence::PgSubscriptionRepository`] - PostgreSQL implementation
/// - Test mocks available with `cfg(test)`
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    /// Returns the subset of `user_ids` that has no subscription yet.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Internal`] on database errors.
    async fn filter_missing(&self, user_ids: &[i64]) -> Result<Vec<i64>, AppError>;

    /// Creates subscriptions expiring at `expired_at`, skipping users that
    /// already have one. Returns the number of rows inserted.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Internal`] on database errors.
    async fn create_many(
        &self,
        user_ids: &[i64],
        expired_at: DateTime<Utc>,
    ) -> Result<u64, AppError>;

    /// # Errors
    ///
    /// Returns [`AppError::Internal`] on database errors.
    async fn find_by_user(&self, user_id: i64) -> Result<Option<Subscription>, AppError>;

    /// Writes a `subscription_checked_outbox` row.
    ///
    /// Returns `false` when the same context and use case was already
    /// answered.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Internal`] on database errors.
    async fn record_check(&self, check: NewSubscriptionCheck) -> Result<bool, AppError>;

    /// Emits `subscription_expired_outbox` rows for lapsed, unchecked
    /// subscriptions and stamps them as checked, in one transaction.
    ///
    /// Returns the number of subscriptions handled.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Internal`] on database errors.
    async fn mark_expired(&self, limit: BatchLimit, fallback: QuotaPerk)
    -> Result<u64, AppError>;
}
