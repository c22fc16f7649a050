mod common;

use common::{MemoryStore, connected_manager, eventually, wait_connected};
use linkmesh::application::workers::{BatchOutcome, OutboxPublisher, PublisherSettings};
use linkmesh::domain::events::{CheckSubscription, CreateSubscription, Envelope, names};
use linkmesh::domain::outbox::{BatchLimit, LinkShortened, UserRegistered};
use linkmesh::domain::repositories::OutboxRepository;
use linkmesh::infrastructure::broker::BrokerPublisher;
use linkmesh::topology;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn seed_registrations(store: &MemoryStore, first_id: i64, users: &[i64]) {
    store.with(|w| {
        for (i, user_id) in users.iter().enumerate() {
            w.register_outbox.push((
                UserRegistered {
                    id: first_id + i as i64,
                    user_id: *user_id,
                },
                false,
            ));
        }
    });
}

fn settings() -> PublisherSettings {
    PublisherSettings {
        interval: Duration::from_millis(20),
        batch_size: 2,
    }
}

#[tokio::test]
async fn test_registration_batch_becomes_one_message() {
    let (broker, manager) = connected_manager().await;
    topology::declare(&manager).await.unwrap();
    let store = MemoryStore::new();
    seed_registrations(&store, 100, &[7, 8, 9]);

    let outbox = store.outbox::<UserRegistered>();
    let publisher = Arc::new(BrokerPublisher::new(manager.clone(), names::PUBLISHER_CHANNEL));
    let worker = OutboxPublisher::<UserRegistered, _, _>::new(outbox.clone(), publisher, settings());

    let outcome = worker.publish_once(BatchLimit::Unbounded).await.unwrap();

    assert_eq!(outcome, BatchOutcome::Published { rows: 3, messages: 1 });
    assert_eq!(outbox.pending_count().await.unwrap(), 0);

    let published = broker.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].routing_key, names::CREATE_SUBSCRIPTION_QUEUE);
    let envelope = Envelope::<CreateSubscription>::decode(&published[0].body).unwrap();
    assert_eq!(envelope.data.users, vec![7, 8, 9]);
    assert_eq!(broker.ready_count(names::CREATE_SUBSCRIPTION_QUEUE), 1);

    manager.stop().await;
}

#[tokio::test]
async fn test_rows_stay_pending_while_disconnected() {
    let (broker, manager) = connected_manager().await;
    topology::declare(&manager).await.unwrap();
    let store = MemoryStore::new();
    store.with(|w| {
        w.link_shortened_outbox.push((
            LinkShortened {
                id: 1,
                user_id: 42,
                link_id: 5,
            },
            false,
        ));
    });

    let outbox = store.outbox::<LinkShortened>();
    let publisher = Arc::new(BrokerPublisher::new(manager.clone(), names::PUBLISHER_CHANNEL));
    let worker = OutboxPublisher::<LinkShortened, _, _>::new(outbox.clone(), publisher, settings());

    broker.set_offline(true);
    broker.drop_connections();
    eventually("redial attempts", || broker.dial_attempts() >= 3).await;

    let outcome = worker.publish_once(BatchLimit::Bounded(10)).await.unwrap();
    assert_eq!(outcome, BatchOutcome::Aborted { published: 0 });
    assert_eq!(outbox.pending_count().await.unwrap(), 1);

    broker.set_offline(false);
    wait_connected(&manager).await;

    let outcome = worker.publish_once(BatchLimit::Bounded(10)).await.unwrap();
    assert_eq!(outcome, BatchOutcome::Published { rows: 1, messages: 1 });
    assert_eq!(outbox.pending_count().await.unwrap(), 0);

    let published = broker.published();
    let envelope = Envelope::<CheckSubscription>::decode(&published[0].body).unwrap();
    assert_eq!(envelope.data.context_id, 5);
    assert_eq!(envelope.data.user_id, 42);

    manager.stop().await;
}

#[tokio::test]
async fn test_nacked_publish_is_retried_on_next_tick() {
    let (broker, manager) = connected_manager().await;
    topology::declare(&manager).await.unwrap();
    let store = MemoryStore::new();
    store.with(|w| {
        for id in 1..=2 {
            w.link_shortened_outbox.push((
                LinkShortened {
                    id,
                    user_id: 42,
                    link_id: 10 + id,
                },
                false,
            ));
        }
    });

    let outbox = store.outbox::<LinkShortened>();
    let publisher = Arc::new(BrokerPublisher::new(manager.clone(), names::PUBLISHER_CHANNEL));
    let worker = OutboxPublisher::<LinkShortened, _, _>::new(outbox.clone(), publisher, settings());

    let first = worker.publish_once(BatchLimit::Bounded(1)).await.unwrap();
    assert_eq!(first, BatchOutcome::Published { rows: 1, messages: 1 });

    broker.nack_next_publishes(1);
    let second = worker.publish_once(BatchLimit::Bounded(1)).await.unwrap();
    assert_eq!(second, BatchOutcome::Aborted { published: 0 });
    assert_eq!(outbox.pending_count().await.unwrap(), 1);

    let third = worker.publish_once(BatchLimit::Bounded(1)).await.unwrap();
    assert_eq!(third, BatchOutcome::Published { rows: 1, messages: 1 });
    assert_eq!(broker.ready_count(names::CHECK_SUBSCRIPTION_QUEUE), 2);

    manager.stop().await;
}

#[tokio::test]
async fn test_running_publisher_delivers_across_reconnect() {
    let (broker, manager) = connected_manager().await;
    topology::declare(&manager).await.unwrap();
    let store = MemoryStore::new();
    seed_registrations(&store, 100, &[1, 2, 3, 4, 5]);

    let outbox = store.outbox::<UserRegistered>();
    let publisher = Arc::new(BrokerPublisher::new(manager.clone(), names::PUBLISHER_CHANNEL));
    let worker = OutboxPublisher::<UserRegistered, _, _>::new(outbox.clone(), publisher, settings());
    let cancel = CancellationToken::new();
    let task = tokio::spawn(worker.run(cancel.clone()));

    eventually("backlog drained", || {
        store.with(|w| w.register_outbox.iter().all(|(_, done)| *done))
    })
    .await;

    broker.drop_connections();
    seed_registrations(&store, 500, &[6]);

    eventually("row published after reconnect", || {
        store.with(|w| w.register_outbox.iter().all(|(_, done)| *done))
    })
    .await;

    let users: Vec<i64> = broker
        .published()
        .iter()
        .flat_map(|m| Envelope::<CreateSubscription>::decode(&m.body).unwrap().data.users)
        .collect();
    for user in 1..=6 {
        assert!(users.contains(&user), "user {user} never published");
    }

    cancel.cancel();
    task.await.unwrap();
    manager.stop().await;
}
