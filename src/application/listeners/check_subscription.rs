//! `check.subscription` consumer.

use async_trait::async_trait;
use std::sync::Arc;

use crate::application::services::SubscriptionService;
use crate::domain::events::{CheckSubscription, Envelope};
use crate::domain::repositories::SubscriptionRepository;
use crate::error::HandlerError;
use crate::infrastructure::broker::MessageHandler;

/// Resolves the perk for a context and enqueues `finish-shortening`.
pub struct CheckSubscriptionListener<S: SubscriptionRepository> {
    service: Arc<SubscriptionService<S>>,
}

impl<S: SubscriptionRepository> CheckSubscriptionListener<S> {
    pub fn new(service: Arc<SubscriptionService<S>>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<S: SubscriptionRepository + 'static> MessageHandler for CheckSubscriptionListener<S> {
    async fn handle(&self, body: &[u8]) -> Result<(), HandlerError> {
        let envelope = Envelope::<CheckSubscription>::decode(body)?;
        self.service.check(&envelope.data).await?;
        Ok(())
    }
}
