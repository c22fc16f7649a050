//! Repository trait for shortened links.

use crate::domain::entities::{Activation, Link, NewLink};
use crate::domain::events::PerkGrant;
use crate::error::AppError;
use async_trait::async_trait;

/// Repository interface for links and their quota bookkeeping.
///
/// The two event-driven mutations, [`apply_perk`](Self::apply_perk) and
/// [`enforce_quota`](Self::enforce_quota), read the owner's links and write
/// the outcome under one lock on those rows, so concurrent deliveries for
/// the same owner are serialized.
///
/// # Implementations
///
/// - [`crate::infrastructure::persistence::PgLinkRepository`] - PostgreSQL implementation
/// - Test mocks available with `cfg(test)`
///
/// # Examples
///
/// See integration tests: `tests/repository_link.rs`
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LinkRepository: Send + Sync {
    /// Inserts the link and its `link_shortened_outbox` row in one transaction.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Conflict`] if the code or alias is already taken.
    /// Returns [`AppError::Internal`] on database errors.
    async fn create(&self, new_link: NewLink) -> Result<Link, AppError>;

    /// # Errors
    ///
    /// Returns [`AppError::Internal`] on database errors.
    async fn find_by_id(&self, id: i64) -> Result<Option<Link>, AppError>;

    /// # Errors
    ///
    /// Returns [`AppError::Internal`] on database errors.
    async fn find_by_alias(&self, alias: &str) -> Result<Option<Link>, AppError>;

    /// Applies a granted perk to a pending link.
    ///
    /// Re-applying to a link that already carries a future expiry is a no-op
    /// reported as [`Activation::AlreadyApplied`].
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] if the link does not exist.
    /// Returns [`AppError::Internal`] on database errors.
    async fn apply_perk(&self, link_id: i64, perk: PerkGrant) -> Result<Activation, AppError>;

    /// Closes the owner's surplus links so at most `limit` stay active.
    ///
    /// Returns the ids that were closed; empty when already within quota.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Internal`] on database errors.
    async fn enforce_quota(&self, user_id: i64, limit: i64) -> Result<Vec<i64>, AppError>;

    /// Counts the owner's open, unexpired links.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Internal`] on database errors.
    async fn count_active(&self, user_id: i64) -> Result<i64, AppError>;
}
