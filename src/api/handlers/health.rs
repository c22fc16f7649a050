//! Handler for health check endpoint.

use axum::{Json, extract::State, http::StatusCode};
use std::collections::BTreeMap;

use crate::api::dto::health::{CheckStatus, HealthChecks, HealthResponse, OutboxCheck};
use crate::infrastructure::broker::ConnectionState;
use crate::state::AppState;

/// Returns service health status with component checks.
///
/// # Endpoint
///
/// `GET /health`
///
/// # Response Codes
///
/// - **200 OK**: Database reachable and broker connected
/// - **503 Service Unavailable**: Either of them is not
///
/// The outbox backlog is informational; a large backlog while the broker is
/// connected means the publishers are falling behind.
///
/// # Response
///
/// ```json
/// {
///   "status": "healthy",
///   "version": "0.1.0",
///   "uptime_secs": 3605,
///   "checks": {
///     "database": { "status": "ok" },
///     "broker": { "status": "ok", "message": "connected" },
///     "outbox": {
///       "status": "ok",
///       "pending": { "link_shortened_outbox": 0, "register_outbox": 2 }
///     }
///   }
/// }
/// ```
pub async fn health_handler(
    State(state): State<AppState>,
) -> Result<Json<HealthResponse>, (StatusCode, Json<HealthResponse>)> {
    let db_check = check_database(&state).await;
    let broker_check = check_broker(&state);
    let outbox_check = check_outbox(&state).await;

    let all_healthy = db_check.status == "ok" && broker_check.status == "ok";

    let response = HealthResponse {
        status: if all_healthy { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        checks: HealthChecks {
            database: db_check,
            broker: broker_check,
            outbox: outbox_check,
        },
    };

    if all_healthy {
        Ok(Json(response))
    } else {
        Err((StatusCode::SERVICE_UNAVAILABLE, Json(response)))
    }
}

async fn check_database(state: &AppState) -> CheckStatus {
    match state.database.ping().await {
        Ok(()) => CheckStatus {
            status: "ok".to_string(),
            message: None,
        },
        Err(e) => CheckStatus {
            status: "error".to_string(),
            message: Some(format!("Database error: {}", e)),
        },
    }
}

fn check_broker(state: &AppState) -> CheckStatus {
    let broker_state = state.broker_state();
    CheckStatus {
        status: if broker_state == ConnectionState::Connected {
            "ok"
        } else {
            "error"
        }
        .to_string(),
        message: Some(broker_state.as_str().to_string()),
    }
}

async fn check_outbox(state: &AppState) -> OutboxCheck {
    let mut pending = BTreeMap::new();
    let mut failed = Vec::new();

    for (table, probe) in &state.outboxes {
        match probe.pending().await {
            Ok(count) => {
                pending.insert(table.to_string(), count);
            }
            Err(e) => failed.push(format!("{table}: {e}")),
        }
    }

    OutboxCheck {
        status: if failed.is_empty() { "ok" } else { "error" }.to_string(),
        message: (!failed.is_empty()).then(|| failed.join("; ")),
        pending,
    }
}
