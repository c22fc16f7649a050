//! Periodic scan for lapsed subscriptions.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::application::services::SubscriptionService;
use crate::domain::outbox::BatchLimit;
use crate::domain::repositories::SubscriptionRepository;

#[derive(Debug, Clone, Copy)]
pub struct WatcherSettings {
    pub interval: Duration,
    pub batch_size: u32,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            batch_size: 500,
        }
    }
}

pub struct ExpiryWatcher<S: SubscriptionRepository> {
    service: Arc<SubscriptionService<S>>,
    settings: WatcherSettings,
}

impl<S: SubscriptionRepository> ExpiryWatcher<S> {
    pub fn new(service: Arc<SubscriptionService<S>>, settings: WatcherSettings) -> Self {
        Self { service, settings }
    }

    /// Runs until `cancel` fires. The first scan happens immediately.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            interval_secs = self.settings.interval.as_secs(),
            batch_size = self.settings.batch_size,
            "expiry watcher started"
        );

        let mut interval = tokio::time::interval(self.settings.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let limit = BatchLimit::Bounded(self.settings.batch_size);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.service.watch_expired(limit).await {
                        error!(error = %e, "expiry scan failed");
                    }
                }
            }
        }
        info!("expiry watcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::PerkInferer;
    use crate::domain::repositories::MockSubscriptionRepository;

    #[tokio::test(start_paused = true)]
    async fn test_scans_on_every_tick() {
        let mut repo = MockSubscriptionRepository::new();
        repo.expect_mark_expired()
            .withf(|limit, _| *limit == BatchLimit::Bounded(500))
            .times(3)
            .returning(|_, _| Ok(0));

        let service = Arc::new(SubscriptionService::new(Arc::new(repo), PerkInferer::default()));
        let watcher = ExpiryWatcher::new(service, WatcherSettings::default());

        let cancel = CancellationToken::new();
        let task = tokio::spawn(watcher.run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(10_500)).await;
        cancel.cancel();
        task.await.unwrap();
    }
}
