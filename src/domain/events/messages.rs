//! Event payloads carried inside an [`Envelope`](super::Envelope).

use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Use case tag of a link that is waiting for its subscription perk.
pub const USECASE_LINK_SHORTENED: &str = "link.shortened";

/// Source tag of events answered by the subscription service.
pub const SOURCE_CHECK_SUBSCRIPTION: &str = "check.subscription";

/// Source tag of events emitted by the expiry watcher.
pub const SOURCE_SUBSCRIPTION_WATCHER: &str = "subscription.watcher";

/// Source tag of events emitted after a registration.
pub const SOURCE_USER_REGISTERED: &str = "user.registered";

/// Users that need a subscription bootstrapped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateSubscription {
    pub users: Vec<i64>,
}

/// Asks the subscription service which perk applies to a user.
///
/// `id` is the producing outbox row, `context_id` the entity waiting for the
/// answer (a link id for [`USECASE_LINK_SHORTENED`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckSubscription {
    pub id: i64,
    pub context_id: i64,
    pub user_id: i64,
    pub usecase: String,
}

/// Perk granted for a checked subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerkGrant {
    pub limit: i64,
    /// Encoded as integer nanoseconds.
    #[serde(with = "nanoseconds")]
    pub lifetime: Duration,
    pub allow_short_edit: bool,
}

/// Answer to a [`CheckSubscription`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishShortening {
    pub id: i64,
    pub context_id: i64,
    pub usecase: String,
    pub perk: PerkGrant,
}

/// Limits a user falls back to once the subscription lapses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaPerk {
    pub limit: i64,
    pub allow_short_edit: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionExpired {
    pub id: i64,
    pub user_id: i64,
    pub perk: QuotaPerk,
}

mod nanoseconds {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(value.num_nanoseconds().unwrap_or(i64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let nanos = i64::deserialize(deserializer)?;
        Ok(Duration::nanoseconds(nanos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lifetime_travels_as_nanoseconds() {
        let perk = PerkGrant {
            limit: 10,
            lifetime: Duration::days(3),
            allow_short_edit: false,
        };

        let value = serde_json::to_value(&perk).unwrap();

        assert_eq!(value["lifetime"], json!(259_200_000_000_000_i64));
        assert_eq!(value["allowShortEdit"], json!(false));
    }

    #[test]
    fn test_finish_shortening_from_wire() {
        let body = json!({
            "id": 4,
            "contextId": 12,
            "usecase": "link.shortened",
            "perk": { "limit": 500, "lifetime": 1_000_000_000_i64, "allowShortEdit": true }
        });

        let msg: FinishShortening = serde_json::from_value(body).unwrap();

        assert_eq!(msg.context_id, 12);
        assert_eq!(msg.perk.lifetime, Duration::seconds(1));
        assert!(msg.perk.allow_short_edit);
    }
}
