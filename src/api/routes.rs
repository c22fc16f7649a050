//! Router of the service's HTTP surface.
//!
//! - `GET /health` - Database, broker and outbox status

use axum::Router;
use axum::routing::get;

use crate::api::handlers::health_handler;
use crate::api::middleware::tracing;
use crate::state::AppState;

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(tracing::layer())
}
