//! Link entity and the rules that open and close links against a quota.

use chrono::{DateTime, Utc};
use std::cmp::Reverse;

use crate::domain::events::PerkGrant;

/// A shortened link.
///
/// `shortened` is the generated code; `alias` is what users visit and equals
/// `shortened` unless the owner picked a custom alias. A link only serves
/// redirects while it is open and its expiry lies in the future.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Link {
    pub id: i64,
    pub user_id: i64,
    pub shortened: String,
    pub alias: String,
    pub destination: String,
    pub is_open: bool,
    pub updated_at: DateTime<Utc>,
    pub expired_at: DateTime<Utc>,
}

impl Link {
    pub fn has_custom_alias(&self) -> bool {
        self.shortened != self.alias
    }

    /// Returns true if the link is open and not yet expired.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.is_open && self.expired_at > now
    }

    /// A future expiry means a perk lifetime was already granted.
    pub fn perk_applied(&self, now: DateTime<Utc>) -> bool {
        self.expired_at > now
    }
}

/// Input data for creating a link.
///
/// New links are open but expire at creation time, so they only start
/// serving once a perk is applied.
#[derive(Debug, Clone)]
pub struct NewLink {
    pub user_id: i64,
    pub shortened: String,
    pub alias: String,
    pub destination: String,
}

impl NewLink {
    pub fn new(
        user_id: i64,
        shortened: String,
        alias: Option<String>,
        destination: String,
    ) -> Self {
        let alias = alias.unwrap_or_else(|| shortened.clone());
        Self {
            user_id,
            shortened,
            alias,
            destination,
        }
    }
}

/// Outcome of applying a `finish-shortening` perk to a link.
#[derive(Debug, Clone, PartialEq)]
pub enum Activation {
    Activated { expired_at: DateTime<Utc> },
    /// The link already carries a future expiry; redelivery.
    AlreadyApplied,
    /// The owner already has `limit` active links; the link stays closed.
    QuotaExceeded { active: i64, limit: i64 },
}

/// Decides whether `link` may be activated.
///
/// `active_others` counts the owner's other active links and must be read
/// under the same lock that guards the subsequent write.
pub fn decide_activation(
    link: &Link,
    active_others: i64,
    perk: &PerkGrant,
    now: DateTime<Utc>,
) -> Activation {
    if link.perk_applied(now) {
        return Activation::AlreadyApplied;
    }
    if active_others >= perk.limit {
        return Activation::QuotaExceeded {
            active: active_others,
            limit: perk.limit,
        };
    }
    Activation::Activated {
        expired_at: now + perk.lifetime,
    }
}

/// Picks the links to close so that at most `limit` stay active.
///
/// Links with a custom alias go first, then the ones holding the longest
/// remaining lifetime, then the newest. Returns an empty list when the owner
/// is already within quota.
pub fn plan_deactivation(links: &[Link], limit: i64, now: DateTime<Utc>) -> Vec<i64> {
    let mut active: Vec<&Link> = links.iter().filter(|l| l.is_active(now)).collect();
    let keep = usize::try_from(limit.max(0)).unwrap_or(usize::MAX);
    if active.len() <= keep {
        return Vec::new();
    }

    active.sort_by_key(|l| (Reverse(l.has_custom_alias()), Reverse(l.expired_at), Reverse(l.id)));

    let excess = active.len() - keep;
    active.into_iter().take(excess).map(|l| l.id).collect()
}
