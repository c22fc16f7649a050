//! `finish.shortening` consumer.

use async_trait::async_trait;
use std::sync::Arc;

use crate::application::services::ShorteningService;
use crate::domain::events::messages::USECASE_LINK_SHORTENED;
use crate::domain::events::{Envelope, FinishShortening};
use crate::domain::repositories::LinkRepository;
use crate::error::HandlerError;
use crate::infrastructure::broker::MessageHandler;

/// Activates a shortened link with the perk granted by the subscription check.
///
/// The link's expiry is the idempotency token: a future expiry means the perk
/// was applied by an earlier delivery.
pub struct FinishShorteningListener<L: LinkRepository> {
    service: Arc<ShorteningService<L>>,
}

impl<L: LinkRepository> FinishShorteningListener<L> {
    pub fn new(service: Arc<ShorteningService<L>>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<L: LinkRepository + 'static> MessageHandler for FinishShorteningListener<L> {
    async fn handle(&self, body: &[u8]) -> Result<(), HandlerError> {
        let envelope = Envelope::<FinishShortening>::decode(body)?;
        let FinishShortening {
            context_id,
            usecase,
            perk,
            ..
        } = envelope.data;

        if usecase != USECASE_LINK_SHORTENED {
            return Err(HandlerError::Permanent(format!("unknown usecase '{usecase}'")));
        }

        self.service.apply_perk(context_id, perk).await?;
        Ok(())
    }
}
