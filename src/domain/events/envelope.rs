//! Wire envelope shared by every event exchanged between services.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Envelope version produced and accepted by this build.
pub const ENVELOPE_VERSION: u32 = 1;

/// Errors raised while encoding or decoding an [`Envelope`].
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("incompatible envelope version: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
}

/// Metadata attached to every event.
///
/// `source` names the fact that caused the event (for example
/// `link.shortened` on a `check-subscription`), which lets a handler tell
/// which use case it is answering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Meta {
    pub version: u32,
    pub issued_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl Meta {
    pub fn now() -> Self {
        Self {
            version: ENVELOPE_VERSION,
            issued_at: Utc::now(),
            source: None,
        }
    }
}

/// `{ "meta": {...}, "data": {...} }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub meta: Meta,
    pub data: T,
}

impl<T> Envelope<T> {
    pub fn new(data: T) -> Self {
        Self {
            meta: Meta::now(),
            data,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.meta.source = Some(source.into());
        self
    }
}

impl<T: Serialize> Envelope<T> {
    pub fn to_bytes(&self) -> Result<Vec<u8>, EnvelopeError> {
        Ok(serde_json::to_vec(self)?)
    }
}

impl<T: DeserializeOwned> Envelope<T> {
    /// Decodes an envelope and checks its version.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Malformed`] when the body is not a valid
    /// envelope for `T`, and [`EnvelopeError::VersionMismatch`] when the
    /// producer speaks another version.
    pub fn decode(body: &[u8]) -> Result<Self, EnvelopeError> {
        let envelope: Envelope<T> = serde_json::from_slice(body)?;
        if envelope.meta.version != ENVELOPE_VERSION {
            return Err(EnvelopeError::VersionMismatch {
                expected: ENVELOPE_VERSION,
                found: envelope.meta.version,
            });
        }
        Ok(envelope)
    }
}
