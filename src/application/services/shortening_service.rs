//! Link shortening and the link-side effects of subscription events.

use serde_json::json;
use std::sync::Arc;

use crate::domain::entities::{Activation, Link, NewLink};
use crate::domain::events::PerkGrant;
use crate::domain::repositories::LinkRepository;
use crate::error::AppError;
use crate::utils::code_generator::{generate_code, validate_alias};
use crate::utils::url_normalizer::normalize_url;

/// Creates links and applies perks and quotas to them.
pub struct ShorteningService<L: LinkRepository> {
    link_repository: Arc<L>,
}

impl<L: LinkRepository> ShorteningService<L> {
    pub fn new(link_repository: Arc<L>) -> Self {
        Self { link_repository }
    }

    /// Creates a link for `user_id` and enqueues its `check-subscription`.
    ///
    /// The link is stored inactive; it opens once the perk arrives through
    /// [`Self::apply_perk`].
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Validation`] for a bad destination or alias and
    /// [`AppError::Conflict`] if the alias is taken.
    pub async fn shorten(
        &self,
        user_id: i64,
        destination: &str,
        alias: Option<String>,
    ) -> Result<Link, AppError> {
        let destination = normalize_url(destination).map_err(|e| {
            AppError::bad_request("Invalid URL format", json!({ "reason": e.to_string() }))
        })?;

        if let Some(alias) = &alias {
            validate_alias(alias)?;
            if self.link_repository.find_by_alias(alias).await?.is_some() {
                return Err(AppError::conflict(
                    "Alias already exists",
                    json!({ "alias": alias }),
                ));
            }
        }

        let code = self.generate_unique_code().await?;
        let link = self
            .link_repository
            .create(NewLink::new(user_id, code, alias, destination))
            .await?;

        tracing::info!(link_id = link.id, user_id, alias = %link.alias, "link shortened");
        Ok(link)
    }

    /// Opens `link_id` with the granted perk unless already applied or over quota.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] if the link does not exist.
    pub async fn apply_perk(&self, link_id: i64, perk: PerkGrant) -> Result<Activation, AppError> {
        let activation = self.link_repository.apply_perk(link_id, perk).await?;
        match &activation {
            Activation::Activated { expired_at } => {
                tracing::info!(link_id, %expired_at, "link activated");
            }
            Activation::AlreadyApplied => {
                tracing::debug!(link_id, "perk already applied");
            }
            Activation::QuotaExceeded { active, limit } => {
                tracing::warn!(link_id, active, limit, "link quota reached, link left inactive");
            }
        }
        Ok(activation)
    }

    /// Closes the owner's excess links so at most `limit` stay active.
    pub async fn enforce_quota(&self, user_id: i64, limit: i64) -> Result<Vec<i64>, AppError> {
        let closed = self.link_repository.enforce_quota(user_id, limit).await?;
        if !closed.is_empty() {
            tracing::info!(user_id, limit, closed = closed.len(), "links closed over quota");
        }
        Ok(closed)
    }

    /// Retries on collision with an existing alias, up to 10 times.
    async fn generate_unique_code(&self) -> Result<String, AppError> {
        const MAX_ATTEMPTS: usize = 10;

        for _ in 0..MAX_ATTEMPTS {
            let code = generate_code()?;
            if self.link_repository.find_by_alias(&code).await?.is_none() {
                return Ok(code);
            }
        }

        Err(AppError::internal(
            "Failed to generate unique code",
            json!({ "reason": "Too many collisions" }),
        ))
    }
}
