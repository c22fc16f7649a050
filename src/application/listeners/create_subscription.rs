//! `create.subscription` consumer.

use async_trait::async_trait;
use std::sync::Arc;

use crate::application::services::SubscriptionService;
use crate::domain::events::{CreateSubscription, Envelope};
use crate::domain::repositories::SubscriptionRepository;
use crate::error::HandlerError;
use crate::infrastructure::broker::MessageHandler;

/// Bootstraps subscriptions for newly registered users.
pub struct CreateSubscriptionListener<S: SubscriptionRepository> {
    service: Arc<SubscriptionService<S>>,
}

impl<S: SubscriptionRepository> CreateSubscriptionListener<S> {
    pub fn new(service: Arc<SubscriptionService<S>>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<S: SubscriptionRepository + 'static> MessageHandler for CreateSubscriptionListener<S> {
    async fn handle(&self, body: &[u8]) -> Result<(), HandlerError> {
        let envelope = Envelope::<CreateSubscription>::decode(body)?;
        self.service.bootstrap(&envelope.data.users).await?;
        Ok(())
    }
}
