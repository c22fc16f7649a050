//! Service runtime setup.
//!
//! Connects PostgreSQL and the broker, declares the topology, attaches the
//! consumers, spawns the outbox publishers and the expiry watcher, then
//! serves the health endpoint until a shutdown signal arrives.

use crate::api::routes::app_router;
use crate::application::listeners::{
    CheckSubscriptionListener, CreateSubscriptionListener, FinishShorteningListener,
    SubscriptionExpiredListener,
};
use crate::application::services::{ShorteningService, SubscriptionService};
use crate::application::workers::{
    ExpiryWatcher, OutboxPublisher, PublisherSettings, WatcherSettings,
};
use crate::config::Config;
use crate::domain::entities::PerkInferer;
use crate::domain::events::names;
use crate::domain::outbox::{LinkShortened, SubscriptionChecked, SubscriptionLapsed, UserRegistered};
use crate::infrastructure::broker::{
    BackoffPolicy, BrokerPublisher, ConnectionManager, dialer_for,
};
use crate::infrastructure::persistence::{
    OutboxTable, PgLinkRepository, PgOutboxRepository, PgSubscriptionRepository,
};
use crate::state::{AppState, OutboxBacklog};
use crate::topology::{self, Listeners};

use anyhow::{Context, Result};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Runs the service with the given configuration.
///
/// # Errors
///
/// Returns an error if:
/// - Database connection or migrations fail
/// - Broker topology or consumers cannot be declared
/// - Server bind fails
pub async fn run(config: Config) -> Result<()> {
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(Duration::from_secs(config.db_connect_timeout))
        .idle_timeout(Duration::from_secs(config.db_idle_timeout))
        .max_lifetime(Duration::from_secs(config.db_max_lifetime))
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Connected to database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;

    let (initial, max) = config.broker_backoff();
    let broker = ConnectionManager::new(
        dialer_for(&config.broker_url),
        BackoffPolicy::new(initial, max),
    );
    let ready = broker.start(config.broker_url.clone()).await?;

    tokio::select! {
        connected = ready => {
            connected.context("Broker manager stopped before connecting")?;
        }
        _ = shutdown_signal() => {
            broker.stop().await;
            return Ok(());
        }
    }

    topology::declare(&broker)
        .await
        .context("Failed to declare broker topology")?;

    let pool = Arc::new(pool);
    let link_repository = Arc::new(PgLinkRepository::new(pool.clone()));
    let subscription_repository = Arc::new(PgSubscriptionRepository::new(pool.clone()));

    let shortening = Arc::new(ShorteningService::new(link_repository));
    let subscriptions = Arc::new(SubscriptionService::new(
        subscription_repository,
        PerkInferer::default(),
    ));

    let listeners = Listeners {
        create_subscription: Arc::new(CreateSubscriptionListener::new(subscriptions.clone())),
        check_subscription: Arc::new(CheckSubscriptionListener::new(subscriptions.clone())),
        finish_shortening: Arc::new(FinishShorteningListener::new(shortening.clone())),
        subscription_expired: Arc::new(SubscriptionExpiredListener::new(shortening)),
    };
    topology::attach_consumers(&broker, listeners, config.consumer_prefetch)
        .await
        .context("Failed to start consumers")?;
    tracing::info!("Consumers attached");

    let cancel = CancellationToken::new();
    let mut workers = JoinSet::new();

    let publisher = Arc::new(BrokerPublisher::new(
        broker.clone(),
        names::PUBLISHER_CHANNEL,
    ));
    let settings = PublisherSettings {
        interval: config.outbox_poll_interval(),
        batch_size: config.outbox_batch_size,
    };

    let state = AppState::new(broker.clone(), pool.clone());
    let state = spawn_outbox::<UserRegistered>(&pool, &publisher, settings, &cancel, &mut workers, state);
    let state = spawn_outbox::<LinkShortened>(&pool, &publisher, settings, &cancel, &mut workers, state);
    let state =
        spawn_outbox::<SubscriptionChecked>(&pool, &publisher, settings, &cancel, &mut workers, state);
    let state =
        spawn_outbox::<SubscriptionLapsed>(&pool, &publisher, settings, &cancel, &mut workers, state);

    let watcher = ExpiryWatcher::new(
        subscriptions,
        WatcherSettings {
            interval: config.expiry_watch_interval(),
            batch_size: config.expiry_watch_batch_size,
        },
    );
    workers.spawn(watcher.run(cancel.clone()));
    tracing::info!(workers = workers.len(), "Background workers started");

    let app = app_router(state);
    let addr: SocketAddr = config.listen_addr.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on http://{addr}");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error occurred");

    tracing::info!("Stopping background workers");
    cancel.cancel();
    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined {
            tracing::error!(error = %e, "Worker ended abnormally");
        }
    }
    broker.stop().await;

    served
}

fn spawn_outbox<R: OutboxTable>(
    pool: &Arc<PgPool>,
    publisher: &Arc<BrokerPublisher>,
    settings: PublisherSettings,
    cancel: &CancellationToken,
    workers: &mut JoinSet<()>,
    state: AppState,
) -> AppState {
    let outbox = Arc::new(PgOutboxRepository::<R>::new(pool.clone()));
    let worker = OutboxPublisher::<R, _, _>::new(outbox.clone(), publisher.clone(), settings);
    workers.spawn(worker.run(cancel.clone()));
    state.with_outbox(
        R::TABLE,
        Arc::new(OutboxBacklog::<R, PgOutboxRepository<R>>::new(outbox)),
    )
}

/// Resolves on Ctrl+C or, on unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::warn!("Received shutdown signal");
}
