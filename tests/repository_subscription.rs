mod common;

use chrono::{Duration, Utc};
use common::{create_subscription, create_test_user, in_days, pending_rows};
use linkmesh::domain::entities::Perk;
use linkmesh::domain::events::QuotaPerk;
use linkmesh::domain::outbox::{BatchLimit, SubscriptionLapsed};
use linkmesh::domain::repositories::{
    NewSubscriptionCheck, OutboxRepository, SubscriptionRepository,
};
use linkmesh::infrastructure::persistence::{PgOutboxRepository, PgSubscriptionRepository};
use sqlx::PgPool;
use std::sync::Arc;

fn fallback() -> QuotaPerk {
    QuotaPerk {
        limit: 10,
        allow_short_edit: false,
    }
}

#[sqlx::test]
async fn test_filter_missing_skips_existing(pool: PgPool) {
    let existing = create_test_user(&pool, "a@example.com").await;
    create_subscription(&pool, existing, in_days(30)).await;
    let repo = PgSubscriptionRepository::new(Arc::new(pool));

    let missing = repo
        .filter_missing(&[existing, 900, 901, 900])
        .await
        .unwrap();

    assert_eq!(missing, vec![900, 901]);
}

#[sqlx::test]
async fn test_create_many_is_idempotent(pool: PgPool) {
    let repo = PgSubscriptionRepository::new(Arc::new(pool));
    let now = Utc::now();

    assert_eq!(repo.create_many(&[1, 2], now).await.unwrap(), 2);
    assert_eq!(repo.create_many(&[2, 3], now).await.unwrap(), 1);

    let sub = repo.find_by_user(3).await.unwrap().unwrap();
    assert!(sub.checked_at.is_none());
}

#[sqlx::test]
async fn test_record_check_once_per_context(pool: PgPool) {
    let repo = PgSubscriptionRepository::new(Arc::new(pool.clone()));
    let check = NewSubscriptionCheck {
        context_id: 77,
        usecase: "link.shortened".to_string(),
        perk: Perk::new(Duration::days(3), 10, false),
    };

    assert!(repo.record_check(check.clone()).await.unwrap());
    assert!(!repo.record_check(check).await.unwrap());
    assert_eq!(pending_rows(&pool, "subscription_checked_outbox").await, 1);

    let lifetime: i64 =
        sqlx::query_scalar("SELECT lifetime_ns FROM subscription_checked_outbox WHERE context_id = 77")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(lifetime, Duration::days(3).num_nanoseconds().unwrap());
}

#[sqlx::test]
async fn test_mark_expired_reports_each_subscription_once(pool: PgPool) {
    let lapsed_user = create_test_user(&pool, "a@example.com").await;
    let active_user = create_test_user(&pool, "b@example.com").await;
    create_subscription(&pool, lapsed_user, Utc::now() - Duration::hours(1)).await;
    create_subscription(&pool, active_user, in_days(30)).await;
    let pool = Arc::new(pool);
    let repo = PgSubscriptionRepository::new(pool.clone());

    assert_eq!(repo.mark_expired(BatchLimit::Bounded(500), fallback()).await.unwrap(), 1);
    assert_eq!(repo.mark_expired(BatchLimit::Bounded(500), fallback()).await.unwrap(), 0);

    let outbox = PgOutboxRepository::<SubscriptionLapsed>::new(pool);
    let rows = outbox.fetch_pending(BatchLimit::Unbounded).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].user_id, lapsed_user);
    assert_eq!(rows[0].link_limit, 10);
    assert!(!rows[0].allow_short_edit);

    let sub = repo.find_by_user(lapsed_user).await.unwrap().unwrap();
    assert!(sub.checked_at.is_some());
}

#[sqlx::test]
async fn test_mark_expired_honours_batch_limit(pool: PgPool) {
    for i in 0..3 {
        let user = create_test_user(&pool, &format!("u{i}@example.com")).await;
        create_subscription(&pool, user, Utc::now() - Duration::minutes(i + 1)).await;
    }
    let repo = PgSubscriptionRepository::new(Arc::new(pool));

    assert_eq!(repo.mark_expired(BatchLimit::Bounded(2), fallback()).await.unwrap(), 2);
    assert_eq!(repo.mark_expired(BatchLimit::Bounded(2), fallback()).await.unwrap(), 1);
}
