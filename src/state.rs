//! Shared state of the health endpoint.

use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Instant;

use crate::domain::repositories::OutboxRepository;
use crate::error::AppError;
use crate::infrastructure::broker::{ConnectionManager, ConnectionState};

/// Reports whether the database answers.
#[async_trait]
pub trait DatabaseProbe: Send + Sync {
    async fn ping(&self) -> Result<(), AppError>;
}

#[async_trait]
impl DatabaseProbe for PgPool {
    async fn ping(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1").execute(self).await?;
        Ok(())
    }
}

/// Number of pending rows in one outbox.
#[async_trait]
pub trait BacklogProbe: Send + Sync {
    async fn pending(&self) -> Result<i64, AppError>;
}

/// Adapts an [`OutboxRepository`] of any row type to a [`BacklogProbe`].
pub struct OutboxBacklog<R, O> {
    outbox: Arc<O>,
    _row: std::marker::PhantomData<fn() -> R>,
}

impl<R, O> OutboxBacklog<R, O> {
    pub fn new(outbox: Arc<O>) -> Self {
        Self {
            outbox,
            _row: std::marker::PhantomData,
        }
    }
}

#[async_trait]
impl<R, O> BacklogProbe for OutboxBacklog<R, O>
where
    R: Send + Sync + 'static,
    O: OutboxRepository<R>,
{
    async fn pending(&self) -> Result<i64, AppError> {
        self.outbox.pending_count().await
    }
}

#[derive(Clone)]
pub struct AppState {
    pub started_at: Instant,
    pub broker: ConnectionManager,
    pub database: Arc<dyn DatabaseProbe>,
    /// Outbox table name and its probe.
    pub outboxes: Vec<(&'static str, Arc<dyn BacklogProbe>)>,
}

impl AppState {
    pub fn new(broker: ConnectionManager, database: Arc<dyn DatabaseProbe>) -> Self {
        Self {
            started_at: Instant::now(),
            broker,
            database,
            outboxes: Vec::new(),
        }
    }

    pub fn with_outbox(mut self, table: &'static str, probe: Arc<dyn BacklogProbe>) -> Self {
        self.outboxes.push((table, probe));
        self
    }

    pub fn broker_state(&self) -> ConnectionState {
        self.broker.state()
    }
}
