//! `link.subscription.expired` consumer.

use async_trait::async_trait;
use std::sync::Arc;

use crate::application::services::ShorteningService;
use crate::domain::events::{Envelope, SubscriptionExpired};
use crate::domain::repositories::LinkRepository;
use crate::error::HandlerError;
use crate::infrastructure::broker::MessageHandler;

/// Closes the links of a lapsed subscriber that exceed the fallback quota.
///
/// Re-applying the same message finds the user within quota and closes
/// nothing.
pub struct SubscriptionExpiredListener<L: LinkRepository> {
    service: Arc<ShorteningService<L>>,
}

impl<L: LinkRepository> SubscriptionExpiredListener<L> {
    pub fn new(service: Arc<ShorteningService<L>>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<L: LinkRepository + 'static> MessageHandler for SubscriptionExpiredListener<L> {
    async fn handle(&self, body: &[u8]) -> Result<(), HandlerError> {
        let envelope = Envelope::<SubscriptionExpired>::decode(body)?;
        let event = envelope.data;
        self.service
            .enforce_quota(event.user_id, event.perk.limit)
            .await?;
        Ok(())
    }
}
