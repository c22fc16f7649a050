//! PostgreSQL implementation of link repository.
//!
//! Perk application and quota enforcement lock every link row of the owner
//! (`SELECT ... FOR UPDATE`, ordered by id) before counting, so concurrent
//! activations and deactivations for one user are serialized.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use sqlx::{PgConnection, PgPool};
use std::sync::Arc;

use super::pg_outbox_repository::enqueue_link_shortened;
use crate::domain::entities::{Activation, Link, NewLink, decide_activation, plan_deactivation};
use crate::domain::events::PerkGrant;
use crate::domain::repositories::LinkRepository;
use crate::error::AppError;

const LINK_COLUMNS: &str =
    "id, user_id, shortened, alias, destination, is_open, updated_at, expired_at";

/// PostgreSQL repository for link storage and activation.
pub struct PgLinkRepository {
    pool: Arc<PgPool>,
}

impl PgLinkRepository {
    /// Creates a new repository with a database connection pool.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

async fn lock_user_links(conn: &mut PgConnection, user_id: i64) -> Result<Vec<Link>, AppError> {
    let sql = format!("SELECT {LINK_COLUMNS} FROM links WHERE user_id = $1 ORDER BY id FOR UPDATE");
    let links = sqlx::query_as::<_, Link>(&sql)
        .bind(user_id)
        .fetch_all(conn)
        .await?;
    Ok(links)
}

#[async_trait]
impl LinkRepository for PgLinkRepository {
    async fn create(&self, new_link: NewLink) -> Result<Link, AppError> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            r#"
            INSERT INTO links (user_id, shortened, alias, destination, is_open, expired_at)
            VALUES ($1, $2, $3, $4, TRUE, now())
            RETURNING {LINK_COLUMNS}
            "#
        );
        let link = sqlx::query_as::<_, Link>(&sql)
            .bind(new_link.user_id)
            .bind(&new_link.shortened)
            .bind(&new_link.alias)
            .bind(&new_link.destination)
            .fetch_one(&mut *tx)
            .await?;

        enqueue_link_shortened(&mut *tx, link.user_id, link.id).await?;
        tx.commit().await?;

        Ok(link)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Link>, AppError> {
        let sql = format!("SELECT {LINK_COLUMNS} FROM links WHERE id = $1");
        let link = sqlx::query_as::<_, Link>(&sql)
            .bind(id)
            .fetch_optional(self.pool.as_ref())
            .await?;
        Ok(link)
    }

    async fn find_by_alias(&self, alias: &str) -> Result<Option<Link>, AppError> {
        let sql = format!("SELECT {LINK_COLUMNS} FROM links WHERE alias = $1");
        let link = sqlx::query_as::<_, Link>(&sql)
            .bind(alias)
            .fetch_optional(self.pool.as_ref())
            .await?;
        Ok(link)
    }

    async fn apply_perk(&self, link_id: i64, perk: PerkGrant) -> Result<Activation, AppError> {
        let mut tx = self.pool.begin().await?;

        let owner = sqlx::query_scalar::<_, i64>("SELECT user_id FROM links WHERE id = $1")
            .bind(link_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| AppError::not_found("Link not found", json!({ "id": link_id })))?;

        let links = lock_user_links(&mut *tx, owner).await?;
        let link = links
            .iter()
            .find(|l| l.id == link_id)
            .ok_or_else(|| AppError::not_found("Link not found", json!({ "id": link_id })))?;

        let now = Utc::now();
        let active_others = links
            .iter()
            .filter(|l| l.id != link_id && l.is_active(now))
            .count() as i64;

        let activation = decide_activation(link, active_others, &perk, now);
        if let Activation::Activated { expired_at } = &activation {
            sqlx::query(
                "UPDATE links SET is_open = TRUE, expired_at = $2, updated_at = now() WHERE id = $1",
            )
            .bind(link_id)
            .bind(expired_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(activation)
    }

    async fn enforce_quota(&self, user_id: i64, limit: i64) -> Result<Vec<i64>, AppError> {
        let mut tx = self.pool.begin().await?;

        let links = lock_user_links(&mut *tx, user_id).await?;
        let closed = plan_deactivation(&links, limit, Utc::now());
        if !closed.is_empty() {
            sqlx::query("UPDATE links SET is_open = FALSE, updated_at = now() WHERE id = ANY($1)")
                .bind(&closed)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        Ok(closed)
    }

    async fn count_active(&self, user_id: i64) -> Result<i64, AppError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM links WHERE user_id = $1 AND is_open AND expired_at > now()",
        )
        .bind(user_id)
        .fetch_one(self.pool.as_ref())
        .await?;
        Ok(count)
    }
}
