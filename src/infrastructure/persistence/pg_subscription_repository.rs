//! PostgreSQL implementation of subscription repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;

use crate::domain::entities::Subscription;
use crate::domain::events::QuotaPerk;
use crate::domain::outbox::BatchLimit;
use crate::domain::repositories::{NewSubscriptionCheck, SubscriptionRepository};
use crate::error::AppError;

/// PostgreSQL repository for subscriptions and their outbox rows.
pub struct PgSubscriptionRepository {
    pool: Arc<PgPool>,
}

impl PgSubscriptionRepository {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct Lapsed {
    id: i64,
    user_id: i64,
}

#[async_trait]
impl SubscriptionRepository for PgSubscriptionRepository {
    async fn filter_missing(&self, user_ids: &[i64]) -> Result<Vec<i64>, AppError> {
        let missing = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT DISTINCT u.id
            FROM UNNEST($1::bigint[]) AS u(id)
            WHERE NOT EXISTS (SELECT 1 FROM subscriptions s WHERE s.user_id = u.id)
            ORDER BY u.id
            "#,
        )
        .bind(user_ids)
        .fetch_all(self.pool.as_ref())
        .await?;
        Ok(missing)
    }

    async fn create_many(
        &self,
        user_ids: &[i64],
        expired_at: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        if user_ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            r#"
            INSERT INTO subscriptions (user_id, expired_at)
            SELECT u.id, $2 FROM UNNEST($1::bigint[]) AS u(id)
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(user_ids)
        .bind(expired_at)
        .execute(self.pool.as_ref())
        .await?;
        Ok(result.rows_affected())
    }

    async fn find_by_user(&self, user_id: i64) -> Result<Option<Subscription>, AppError> {
        let subscription = sqlx::query_as::<_, Subscription>(
            "SELECT id, user_id, expired_at, checked_at FROM subscriptions WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(self.pool.as_ref())
        .await?;
        Ok(subscription)
    }

    async fn record_check(&self, check: NewSubscriptionCheck) -> Result<bool, AppError> {
        let lifetime_ns = check.perk.lifetime.num_nanoseconds().ok_or_else(|| {
            AppError::bad_request(
                "Perk lifetime out of range",
                json!({ "lifetime_secs": check.perk.lifetime.num_seconds() }),
            )
        })?;

        let result = sqlx::query(
            r#"
            INSERT INTO subscription_checked_outbox
                (context_id, usecase, lifetime_ns, link_limit, allow_short_edit)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (context_id, usecase) DO NOTHING
            "#,
        )
        .bind(check.context_id)
        .bind(&check.usecase)
        .bind(lifetime_ns)
        .bind(check.perk.limit)
        .bind(check.perk.allow_short_edit)
        .execute(self.pool.as_ref())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_expired(
        &self,
        limit: BatchLimit,
        fallback: QuotaPerk,
    ) -> Result<u64, AppError> {
        let mut tx = self.pool.begin().await?;

        let lapsed = sqlx::query_as::<_, Lapsed>(
            r#"
            SELECT id, user_id FROM subscriptions
            WHERE expired_at < now() AND checked_at IS NULL
            ORDER BY expired_at
            LIMIT $1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(limit.as_sql())
        .fetch_all(&mut *tx)
        .await?;

        if lapsed.is_empty() {
            return Ok(0);
        }

        let ids: Vec<i64> = lapsed.iter().map(|s| s.id).collect();
        let users: Vec<i64> = lapsed.iter().map(|s| s.user_id).collect();

        sqlx::query(
            r#"
            INSERT INTO subscription_expired_outbox (user_id, link_limit, allow_short_edit)
            SELECT u.id, $2, $3 FROM UNNEST($1::bigint[]) AS u(id)
            "#,
        )
        .bind(&users)
        .bind(fallback.limit)
        .bind(fallback.allow_short_edit)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE subscriptions SET checked_at = now() WHERE id = ANY($1)")
            .bind(&ids)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(ids.len() as u64)
    }
}
