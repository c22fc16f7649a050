//! Subscription bootstrap, perk checks and expiry detection.

use chrono::Utc;
use std::sync::Arc;

use crate::domain::entities::PerkInferer;
use crate::domain::events::messages::USECASE_LINK_SHORTENED;
use crate::domain::events::CheckSubscription;
use crate::domain::outbox::BatchLimit;
use crate::domain::repositories::{NewSubscriptionCheck, SubscriptionRepository};
use crate::error::{AppError, HandlerError};

/// Use cases a subscription check can be requested for.
pub const KNOWN_USECASES: &[&str] = &[USECASE_LINK_SHORTENED];

pub struct SubscriptionService<S: SubscriptionRepository> {
    subscription_repository: Arc<S>,
    inferer: PerkInferer,
}

impl<S: SubscriptionRepository> SubscriptionService<S> {
    pub fn new(subscription_repository: Arc<S>, inferer: PerkInferer) -> Self {
        Self {
            subscription_repository,
            inferer,
        }
    }

    /// Creates subscriptions for the users that have none yet.
    ///
    /// New subscriptions expire immediately, which leaves the user on the
    /// basic perk. Users that already have one are skipped, so a redelivered
    /// `create-subscription` changes nothing.
    pub async fn bootstrap(&self, users: &[i64]) -> Result<u64, AppError> {
        let missing = self.subscription_repository.filter_missing(users).await?;
        if missing.is_empty() {
            tracing::debug!(users = users.len(), "subscriptions already exist");
            return Ok(0);
        }

        let created = self
            .subscription_repository
            .create_many(&missing, Utc::now())
            .await?;
        tracing::info!(created, requested = users.len(), "subscriptions created");
        Ok(created)
    }

    /// Resolves the perk for a checked context and enqueues `finish-shortening`.
    ///
    /// A user without a subscription yet gets the basic perk. Returns whether
    /// a new outbox row was written; a repeated check for the same context
    /// and use case writes nothing.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError::Permanent`] for an unknown use case.
    pub async fn check(&self, request: &CheckSubscription) -> Result<bool, HandlerError> {
        if !KNOWN_USECASES.contains(&request.usecase.as_str()) {
            return Err(HandlerError::Permanent(format!(
                "unknown usecase '{}'",
                request.usecase
            )));
        }

        let subscription = self
            .subscription_repository
            .find_by_user(request.user_id)
            .await?;
        let perk = match &subscription {
            Some(subscription) => self.inferer.infer(subscription, Utc::now()),
            None => &self.inferer.basic,
        };

        let recorded = self
            .subscription_repository
            .record_check(NewSubscriptionCheck {
                context_id: request.context_id,
                usecase: request.usecase.clone(),
                perk: perk.clone(),
            })
            .await?;

        tracing::info!(
            user_id = request.user_id,
            context_id = request.context_id,
            limit = perk.limit,
            recorded,
            "subscription checked"
        );
        Ok(recorded)
    }

    /// Moves lapsed subscriptions into the expiry outbox.
    ///
    /// Each lapsed subscription is reported once with the basic quota.
    pub async fn watch_expired(&self, limit: BatchLimit) -> Result<u64, AppError> {
        let marked = self
            .subscription_repository
            .mark_expired(limit, self.inferer.basic.to_quota())
            .await?;
        if marked > 0 {
            tracing::info!(marked, "expired subscriptions detected");
        }
        Ok(marked)
    }
}
