//! Repository trait for outbox tables.

use crate::domain::outbox::BatchLimit;
use crate::error::AppError;
use async_trait::async_trait;

/// Poll side of one outbox table.
///
/// Rows are never deleted; [`resolve`](Self::resolve) only flips `is_done`.
///
/// # Implementations
///
/// - [`crate::infrastructure::persistence::PgOutboxRepository`] - PostgreSQL implementation
/// - Test mocks available with `cfg(test)`
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OutboxRepository<R: Send + Sync + 'static>: Send + Sync {
    /// Returns pending rows, at most `limit` of them. Order is unspecified.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Internal`] on database errors.
    async fn fetch_pending(&self, limit: BatchLimit) -> Result<Vec<R>, AppError>;

    /// Marks rows as published.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Internal`] on database errors.
    async fn resolve(&self, ids: &[i64]) -> Result<(), AppError>;

    /// # Errors
    ///
    /// Returns [`AppError::Internal`] on database errors.
    async fn pending_count(&self) -> Result<i64, AppError>;
}
