//! Error types shared across layers.
//!
//! - [`AppError`] - repository and service failures
//! - [`BrokerError`] - connection, topology and publish failures
//! - [`HandlerError`] - outcome of a failed delivery, drives ack/nack

use serde_json::{Value, json};

use crate::domain::events::EnvelopeError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("validation error: {message}")]
    Validation { message: String, details: Value },
    #[error("not found: {message}")]
    NotFound { message: String, details: Value },
    #[error("conflict: {message}")]
    Conflict { message: String, details: Value },
    #[error("internal error: {message}")]
    Internal { message: String, details: Value },
}

impl AppError {
    pub fn bad_request(message: impl Into<String>, details: Value) -> Self {
        Self::Validation {
            message: message.into(),
            details,
        }
    }
    pub fn not_found(message: impl Into<String>, details: Value) -> Self {
        Self::NotFound {
            message: message.into(),
            details,
        }
    }
    pub fn conflict(message: impl Into<String>, details: Value) -> Self {
        Self::Conflict {
            message: message.into(),
            details,
        }
    }
    pub fn internal(message: impl Into<String>, details: Value) -> Self {
        Self::Internal {
            message: message.into(),
            details,
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        map_sqlx_error(e)
    }
}

pub fn map_sqlx_error(e: sqlx::Error) -> AppError {
    if let Some(db) = e.as_database_error()
        && db.is_unique_violation()
    {
        return AppError::conflict(
            "Unique constraint violation",
            json!({ "constraint": db.constraint() }),
        );
    }

    tracing::error!(error = %e, "database error");
    AppError::internal("Database error", json!({ "reason": e.to_string() }))
}

/// Failures of the broker connection manager and its transports.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BrokerError {
    /// No connection has been established yet, or the manager was stopped.
    #[error("broker is not connected")]
    NotConnected,

    #[error("channel '{0}' is not registered")]
    ChannelNotRegistered(String),

    #[error("connection manager already started")]
    AlreadyStarted,

    #[error("broker rejected publish to exchange '{exchange}' with key '{routing_key}'")]
    PublishNacked {
        exchange: String,
        routing_key: String,
    },

    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    #[error("transport error: {0}")]
    Transport(String),
}

impl From<lapin::Error> for BrokerError {
    fn from(e: lapin::Error) -> Self {
        match e {
            lapin::Error::InvalidConnectionState(state) => {
                BrokerError::ConnectionClosed(format!("{state:?}"))
            }
            other => BrokerError::Transport(other.to_string()),
        }
    }
}

/// Error returned by a message handler.
///
/// Permanent failures are rejected without requeue so they reach the
/// dead-letter exchange of the queue, if any. Transient failures follow the
/// consumer's requeue option.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("permanent failure: {0}")]
    Permanent(String),

    #[error("transient failure: {0}")]
    Transient(String),
}

impl HandlerError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, HandlerError::Permanent(_))
    }
}

impl From<EnvelopeError> for HandlerError {
    fn from(e: EnvelopeError) -> Self {
        HandlerError::Permanent(e.to_string())
    }
}

impl From<AppError> for HandlerError {
    fn from(e: AppError) -> Self {
        match e {
            AppError::Validation { .. } | AppError::NotFound { .. } => {
                HandlerError::Permanent(e.to_string())
            }
            AppError::Conflict { .. } | AppError::Internal { .. } => {
                HandlerError::Transient(e.to_string())
            }
        }
    }
}
