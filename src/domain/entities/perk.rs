//! Plan-dependent limits and their inference from a subscription.

use chrono::{DateTime, Duration, Utc};

use crate::domain::entities::Subscription;
use crate::domain::events::{PerkGrant, QuotaPerk};

/// Limits granted by a plan.
#[derive(Debug, Clone, PartialEq)]
pub struct Perk {
    /// How long an activated link stays open.
    pub lifetime: Duration,
    /// Maximum number of simultaneously open links.
    pub limit: i64,
    /// Whether the user may give links a custom alias.
    pub allow_short_edit: bool,
}

impl Perk {
    pub fn new(lifetime: Duration, limit: i64, allow_short_edit: bool) -> Self {
        Self {
            lifetime,
            limit,
            allow_short_edit,
        }
    }

    pub fn to_grant(&self) -> PerkGrant {
        PerkGrant {
            limit: self.limit,
            lifetime: self.lifetime,
            allow_short_edit: self.allow_short_edit,
        }
    }

    pub fn to_quota(&self) -> QuotaPerk {
        QuotaPerk {
            limit: self.limit,
            allow_short_edit: self.allow_short_edit,
        }
    }
}

/// Picks the perk that applies to a subscription.
///
/// A subscription counts as premium while its expiry, minus `deviation`, is
/// still ahead of `now`. The deviation absorbs clock drift between services
/// so that a subscription about to lapse is not granted premium limits.
#[derive(Debug, Clone)]
pub struct PerkInferer {
    pub basic: Perk,
    pub premium: Perk,
    pub deviation: Duration,
}

impl PerkInferer {
    pub fn new(basic: Perk, premium: Perk, deviation: Duration) -> Self {
        Self {
            basic,
            premium,
            deviation,
        }
    }

    pub fn infer(&self, subscription: &Subscription, now: DateTime<Utc>) -> &Perk {
        if subscription.expired_at - self.deviation > now {
            &self.premium
        } else {
            &self.basic
        }
    }
}

impl Default for PerkInferer {
    fn default() -> Self {
        Self::new(
            Perk::new(Duration::days(3), 10, false),
            Perk::new(Duration::days(360), 500, true),
            Duration::seconds(5),
        )
    }
}
