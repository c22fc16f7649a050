#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use linkmesh::domain::entities::{
    Activation, Link, NewLink, NewUser, Subscription, User, decide_activation, plan_deactivation,
};
use linkmesh::domain::events::{PerkGrant, QuotaPerk};
use linkmesh::domain::outbox::{
    BatchLimit, LinkShortened, SubscriptionChecked, SubscriptionLapsed, UserRegistered,
};
use linkmesh::domain::repositories::{
    AccountRepository, LinkRepository, NewSubscriptionCheck, OutboxRepository,
    SubscriptionRepository,
};
use linkmesh::error::{AppError, HandlerError};
use linkmesh::infrastructure::broker::{
    BackoffPolicy, ConnectionManager, ConnectionState, MemoryBroker, MessageHandler,
};
use serde_json::json;
use sqlx::PgPool;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

pub const MEMORY_URL: &str = "memory://test";

/// Starts a manager on a fresh in-process broker and waits for the first
/// connection.
pub async fn connected_manager() -> (MemoryBroker, ConnectionManager) {
    let broker = MemoryBroker::new();
    let manager = ConnectionManager::new(
        Arc::new(broker.dialer()),
        BackoffPolicy::new(StdDuration::from_millis(10), StdDuration::from_millis(80)),
    );
    let ready = manager.start(MEMORY_URL).await.unwrap();
    tokio::time::timeout(StdDuration::from_secs(5), ready)
        .await
        .expect("manager did not connect")
        .unwrap();
    (broker, manager)
}

/// Polls `condition` every 10ms until it holds, panicking after 5s.
pub async fn eventually(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + StdDuration::from_secs(5);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(StdDuration::from_millis(10)).await;
    }
}

pub async fn wait_connected(manager: &ConnectionManager) {
    tokio::time::timeout(
        StdDuration::from_secs(5),
        manager.wait_for_state(ConnectionState::Connected),
    )
    .await
    .expect("manager did not reconnect");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Ok,
    Permanent,
    Transient,
}

/// Handler recording every body it sees and answering with a fixed reply.
pub struct RecordingHandler {
    reply: Mutex<Reply>,
    seen: Mutex<Vec<Vec<u8>>>,
}

impl RecordingHandler {
    pub fn new(reply: Reply) -> Arc<Self> {
        Arc::new(Self {
            reply: Mutex::new(reply),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn set_reply(&self, reply: Reply) {
        *self.reply.lock().unwrap() = reply;
    }

    pub fn seen(&self) -> Vec<Vec<u8>> {
        self.seen.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

#[async_trait]
impl MessageHandler for RecordingHandler {
    async fn handle(&self, body: &[u8]) -> Result<(), HandlerError> {
        self.seen.lock().unwrap().push(body.to_vec());
        match *self.reply.lock().unwrap() {
            Reply::Ok => Ok(()),
            Reply::Permanent => Err(HandlerError::Permanent("rejected".to_string())),
            Reply::Transient => Err(HandlerError::Transient("try again".to_string())),
        }
    }
}

/// In-memory stand-in for the three services' databases.
///
/// Every write that the PostgreSQL repositories pair with an outbox insert
/// does the same here, under one lock.
#[derive(Default)]
pub struct World {
    pub users: Vec<User>,
    pub links: Vec<Link>,
    pub subscriptions: Vec<Subscription>,
    pub checks: Vec<(i64, String)>,
    pub register_outbox: Vec<(UserRegistered, bool)>,
    pub link_shortened_outbox: Vec<(LinkShortened, bool)>,
    pub checked_outbox: Vec<(SubscriptionChecked, bool)>,
    pub expired_outbox: Vec<(SubscriptionLapsed, bool)>,
    next_id: i64,
}

impl World {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    world: Arc<Mutex<World>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<T>(&self, f: impl FnOnce(&mut World) -> T) -> T {
        f(&mut self.world.lock().unwrap())
    }

    pub fn link(&self, id: i64) -> Option<Link> {
        self.with(|w| w.links.iter().find(|l| l.id == id).cloned())
    }

    pub fn subscription(&self, user_id: i64) -> Option<Subscription> {
        self.with(|w| w.subscriptions.iter().find(|s| s.user_id == user_id).cloned())
    }

    /// Inserts a link that is already active until `expired_at`.
    pub fn seed_active_link(&self, user_id: i64, alias: Option<&str>, expired_at: DateTime<Utc>) -> i64 {
        self.with(|w| {
            let id = w.next_id();
            let shortened = format!("code{id:04}");
            w.links.push(Link {
                id,
                user_id,
                alias: alias.map_or_else(|| shortened.clone(), str::to_string),
                shortened,
                destination: "https://example.com/".to_string(),
                is_open: true,
                updated_at: Utc::now(),
                expired_at,
            });
            id
        })
    }

    pub fn accounts(&self) -> Arc<MemoryAccounts> {
        Arc::new(MemoryAccounts(self.clone()))
    }

    pub fn links(&self) -> Arc<MemoryLinks> {
        Arc::new(MemoryLinks(self.clone()))
    }

    pub fn subscriptions(&self) -> Arc<MemorySubscriptions> {
        Arc::new(MemorySubscriptions(self.clone()))
    }

    pub fn outbox<R: MemoryRow>(&self) -> Arc<MemoryOutbox<R>> {
        Arc::new(MemoryOutbox {
            store: self.clone(),
            _row: std::marker::PhantomData,
        })
    }
}

pub struct MemoryAccounts(MemoryStore);

#[async_trait]
impl AccountRepository for MemoryAccounts {
    async fn register(&self, new_user: NewUser) -> Result<User, AppError> {
        self.0.with(|w| {
            if w.users.iter().any(|u| u.email == new_user.email) {
                return Err(AppError::conflict("Unique constraint violation", json!({})));
            }
            let id = w.next_id();
            let user = User {
                id,
                email: new_user.email,
                created_at: Utc::now(),
            };
            w.users.push(user.clone());
            let row = w.next_id();
            w.register_outbox
                .push((UserRegistered { id: row, user_id: id }, false));
            Ok(user)
        })
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        Ok(self.0.with(|w| w.users.iter().find(|u| u.email == email).cloned()))
    }
}

pub struct MemoryLinks(MemoryStore);

#[async_trait]
impl LinkRepository for MemoryLinks {
    async fn create(&self, new_link: NewLink) -> Result<Link, AppError> {
        self.0.with(|w| {
            let id = w.next_id();
            let now = Utc::now();
            let link = Link {
                id,
                user_id: new_link.user_id,
                shortened: new_link.shortened,
                alias: new_link.alias,
                destination: new_link.destination,
                is_open: true,
                updated_at: now,
                expired_at: now,
            };
            w.links.push(link.clone());
            let row = w.next_id();
            w.link_shortened_outbox.push((
                LinkShortened {
                    id: row,
                    user_id: link.user_id,
                    link_id: id,
                },
                false,
            ));
            Ok(link)
        })
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Link>, AppError> {
        Ok(self.0.link(id))
    }

    async fn find_by_alias(&self, alias: &str) -> Result<Option<Link>, AppError> {
        Ok(self.0.with(|w| w.links.iter().find(|l| l.alias == alias).cloned()))
    }

    async fn apply_perk(&self, link_id: i64, perk: PerkGrant) -> Result<Activation, AppError> {
        self.0.with(|w| {
            let now = Utc::now();
            let link = w
                .links
                .iter()
                .find(|l| l.id == link_id)
                .cloned()
                .ok_or_else(|| AppError::not_found("Link not found", json!({ "id": link_id })))?;
            let active_others = w
                .links
                .iter()
                .filter(|l| l.user_id == link.user_id && l.id != link_id && l.is_active(now))
                .count() as i64;

            let activation = decide_activation(&link, active_others, &perk, now);
            if let Activation::Activated { expired_at } = &activation
                && let Some(stored) = w.links.iter_mut().find(|l| l.id == link_id)
            {
                stored.expired_at = *expired_at;
                stored.updated_at = now;
            }
            Ok(activation)
        })
    }

    async fn enforce_quota(&self, user_id: i64, limit: i64) -> Result<Vec<i64>, AppError> {
        Ok(self.0.with(|w| {
            let owned: Vec<Link> = w.links.iter().filter(|l| l.user_id == user_id).cloned().collect();
            let closed = plan_deactivation(&owned, limit, Utc::now());
            for link in w.links.iter_mut().filter(|l| closed.contains(&l.id)) {
                link.is_open = false;
            }
            closed
        }))
    }

    async fn count_active(&self, user_id: i64) -> Result<i64, AppError> {
        let now = Utc::now();
        Ok(self.0.with(|w| {
            w.links
                .iter()
                .filter(|l| l.user_id == user_id && l.is_active(now))
                .count() as i64
        }))
    }
}

pub struct MemorySubscriptions(MemoryStore);

#[async_trait]
impl SubscriptionRepository for MemorySubscriptions {
    async fn filter_missing(&self, user_ids: &[i64]) -> Result<Vec<i64>, AppError> {
        Ok(self.0.with(|w| {
            let mut missing: Vec<i64> = user_ids
                .iter()
                .copied()
                .filter(|id| !w.subscriptions.iter().any(|s| s.user_id == *id))
                .collect();
            missing.sort_unstable();
            missing.dedup();
            missing
        }))
    }

    async fn create_many(
        &self,
        user_ids: &[i64],
        expired_at: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        Ok(self.0.with(|w| {
            let mut created = 0;
            for user_id in user_ids {
                if w.subscriptions.iter().any(|s| s.user_id == *user_id) {
                    continue;
                }
                let id = w.next_id();
                w.subscriptions.push(Subscription {
                    id,
                    user_id: *user_id,
                    expired_at,
                    checked_at: None,
                });
                created += 1;
            }
            created
        }))
    }

    async fn find_by_user(&self, user_id: i64) -> Result<Option<Subscription>, AppError> {
        Ok(self.0.subscription(user_id))
    }

    async fn record_check(&self, check: NewSubscriptionCheck) -> Result<bool, AppError> {
        Ok(self.0.with(|w| {
            let key = (check.context_id, check.usecase.clone());
            if w.checks.contains(&key) {
                return false;
            }
            w.checks.push(key);
            let row = w.next_id();
            w.checked_outbox.push((
                SubscriptionChecked {
                    id: row,
                    context_id: check.context_id,
                    usecase: check.usecase,
                    lifetime_ns: check.perk.lifetime.num_nanoseconds().unwrap_or(i64::MAX),
                    link_limit: check.perk.limit,
                    allow_short_edit: check.perk.allow_short_edit,
                },
                false,
            ));
            true
        }))
    }

    async fn mark_expired(&self, limit: BatchLimit, fallback: QuotaPerk) -> Result<u64, AppError> {
        Ok(self.0.with(|w| {
            let now = Utc::now();
            let cap = limit.as_sql().map_or(usize::MAX, |n| n as usize);
            let lapsed: Vec<(i64, i64)> = w
                .subscriptions
                .iter()
                .filter(|s| s.expired_at < now && s.checked_at.is_none())
                .take(cap)
                .map(|s| (s.id, s.user_id))
                .collect();
            for (id, user_id) in &lapsed {
                let row = w.next_id();
                w.expired_outbox.push((
                    SubscriptionLapsed {
                        id: row,
                        user_id: *user_id,
                        link_limit: fallback.limit,
                        allow_short_edit: fallback.allow_short_edit,
                    },
                    false,
                ));
                if let Some(s) = w.subscriptions.iter_mut().find(|s| s.id == *id) {
                    s.checked_at = Some(now);
                }
            }
            lapsed.len() as u64
        }))
    }
}

/// Selects the outbox table of a row type inside [`World`].
pub trait MemoryRow: Clone + Send + Sync + 'static {
    fn table(world: &mut World) -> &mut Vec<(Self, bool)>;
    fn row_id(&self) -> i64;
}

impl MemoryRow for UserRegistered {
    fn table(world: &mut World) -> &mut Vec<(Self, bool)> {
        &mut world.register_outbox
    }
    fn row_id(&self) -> i64 {
        self.id
    }
}

impl MemoryRow for LinkShortened {
    fn table(world: &mut World) -> &mut Vec<(Self, bool)> {
        &mut world.link_shortened_outbox
    }
    fn row_id(&self) -> i64 {
        self.id
    }
}

impl MemoryRow for SubscriptionChecked {
    fn table(world: &mut World) -> &mut Vec<(Self, bool)> {
        &mut world.checked_outbox
    }
    fn row_id(&self) -> i64 {
        self.id
    }
}

impl MemoryRow for SubscriptionLapsed {
    fn table(world: &mut World) -> &mut Vec<(Self, bool)> {
        &mut world.expired_outbox
    }
    fn row_id(&self) -> i64 {
        self.id
    }
}

pub struct MemoryOutbox<R> {
    store: MemoryStore,
    _row: std::marker::PhantomData<fn() -> R>,
}

#[async_trait]
impl<R: MemoryRow> OutboxRepository<R> for MemoryOutbox<R> {
    async fn fetch_pending(&self, limit: BatchLimit) -> Result<Vec<R>, AppError> {
        let cap = limit.as_sql().map_or(usize::MAX, |n| n as usize);
        Ok(self.store.with(|w| {
            R::table(w)
                .iter()
                .filter(|(_, done)| !done)
                .take(cap)
                .map(|(row, _)| row.clone())
                .collect()
        }))
    }

    async fn resolve(&self, ids: &[i64]) -> Result<(), AppError> {
        self.store.with(|w| {
            for (row, done) in R::table(w).iter_mut() {
                if ids.contains(&row.row_id()) {
                    *done = true;
                }
            }
        });
        Ok(())
    }

    async fn pending_count(&self) -> Result<i64, AppError> {
        Ok(self
            .store
            .with(|w| R::table(w).iter().filter(|(_, done)| !done).count() as i64))
    }
}

pub fn in_days(days: i64) -> DateTime<Utc> {
    Utc::now() + Duration::days(days)
}

// PostgreSQL fixtures for `#[sqlx::test]`.

pub async fn create_test_user(pool: &PgPool, email: &str) -> i64 {
    sqlx::query_scalar::<_, i64>("INSERT INTO users (email, password_hash) VALUES ($1, 'x') RETURNING id")
        .bind(email)
        .fetch_one(pool)
        .await
        .unwrap()
}

pub async fn create_active_link(
    pool: &PgPool,
    user_id: i64,
    code: &str,
    alias: &str,
    expired_at: DateTime<Utc>,
) -> i64 {
    sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO links (user_id, shortened, alias, destination, is_open, expired_at)
        VALUES ($1, $2, $3, 'https://example.com/', TRUE, $4)
        RETURNING id
        "#,
    )
    .bind(user_id)
    .bind(code)
    .bind(alias)
    .bind(expired_at)
    .fetch_one(pool)
    .await
    .unwrap()
}

pub async fn create_subscription(pool: &PgPool, user_id: i64, expired_at: DateTime<Utc>) -> i64 {
    sqlx::query_scalar::<_, i64>(
        "INSERT INTO subscriptions (user_id, expired_at) VALUES ($1, $2) RETURNING id",
    )
    .bind(user_id)
    .bind(expired_at)
    .fetch_one(pool)
    .await
    .unwrap()
}

pub async fn pending_rows(pool: &PgPool, table: &str) -> i64 {
    sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {table} WHERE NOT is_done"))
        .fetch_one(pool)
        .await
        .unwrap()
}
