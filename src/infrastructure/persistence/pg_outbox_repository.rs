//! PostgreSQL outbox tables.
//!
//! Every outbox table shares the same shape: a `BIGSERIAL id`, the event
//! context columns and an `is_done` flag. Rows are never deleted.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgConnection, PgPool};
use std::marker::PhantomData;
use std::sync::Arc;

use crate::domain::outbox::{
    BatchLimit, LinkShortened, OutboxEvent, SubscriptionChecked, SubscriptionLapsed,
    UserRegistered,
};
use crate::domain::repositories::OutboxRepository;
use crate::error::AppError;

/// Binds an outbox row type to its table.
pub trait OutboxTable: OutboxEvent + for<'r> FromRow<'r, PgRow> + Unpin {
    const TABLE: &'static str;
    /// Columns selected into the row type, in any order.
    const COLUMNS: &'static str;
}

impl OutboxTable for UserRegistered {
    const TABLE: &'static str = "register_outbox";
    const COLUMNS: &'static str = "id, user_id";
}

impl OutboxTable for LinkShortened {
    const TABLE: &'static str = "link_shortened_outbox";
    const COLUMNS: &'static str = "id, user_id, link_id";
}

impl OutboxTable for SubscriptionChecked {
    const TABLE: &'static str = "subscription_checked_outbox";
    const COLUMNS: &'static str =
        "id, context_id, usecase, lifetime_ns, link_limit, allow_short_edit";
}

impl OutboxTable for SubscriptionLapsed {
    const TABLE: &'static str = "subscription_expired_outbox";
    const COLUMNS: &'static str = "id, user_id, link_limit, allow_short_edit";
}

/// Poll side of one outbox table.
pub struct PgOutboxRepository<R> {
    pool: Arc<PgPool>,
    _row: PhantomData<fn() -> R>,
}

impl<R> PgOutboxRepository<R> {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self {
            pool,
            _row: PhantomData,
        }
    }
}

#[async_trait]
impl<R: OutboxTable> OutboxRepository<R> for PgOutboxRepository<R> {
    async fn fetch_pending(&self, limit: BatchLimit) -> Result<Vec<R>, AppError> {
        let sql = format!(
            "SELECT {} FROM {} WHERE NOT is_done ORDER BY id LIMIT $1",
            R::COLUMNS,
            R::TABLE
        );
        let rows = sqlx::query_as::<_, R>(&sql)
            .bind(limit.as_sql())
            .fetch_all(self.pool.as_ref())
            .await?;
        Ok(rows)
    }

    async fn resolve(&self, ids: &[i64]) -> Result<(), AppError> {
        if ids.is_empty() {
            return Ok(());
        }
        let sql = format!(
            "UPDATE {} SET is_done = TRUE WHERE id = ANY($1)",
            R::TABLE
        );
        sqlx::query(&sql)
            .bind(ids)
            .execute(self.pool.as_ref())
            .await?;
        Ok(())
    }

    async fn pending_count(&self) -> Result<i64, AppError> {
        let sql = format!("SELECT COUNT(*) FROM {} WHERE NOT is_done", R::TABLE);
        let count = sqlx::query_scalar::<_, i64>(&sql)
            .fetch_one(self.pool.as_ref())
            .await?;
        Ok(count)
    }
}

/// Enqueues a `create-subscription` fact inside the caller's transaction.
pub async fn enqueue_registration(conn: &mut PgConnection, user_id: i64) -> Result<(), AppError> {
    sqlx::query("INSERT INTO register_outbox (user_id) VALUES ($1)")
        .bind(user_id)
        .execute(conn)
        .await?;
    Ok(())
}

/// Enqueues a `check-subscription` fact inside the caller's transaction.
pub async fn enqueue_link_shortened(
    conn: &mut PgConnection,
    user_id: i64,
    link_id: i64,
) -> Result<(), AppError> {
    sqlx::query("INSERT INTO link_shortened_outbox (user_id, link_id) VALUES ($1, $2)")
        .bind(user_id)
        .bind(link_id)
        .execute(conn)
        .await?;
    Ok(())
}
