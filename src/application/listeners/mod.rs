//! Queue consumers applying inbound events.
//!
//! Every listener decodes the envelope, then delegates to a service. Decode
//! failures and unknown use cases are permanent; the delivery is rejected
//! without requeue.

pub mod check_subscription;
pub mod create_subscription;
pub mod finish_shortening;
pub mod subscription_expired;

pub use check_subscription::CheckSubscriptionListener;
pub use create_subscription::CreateSubscriptionListener;
pub use finish_shortening::FinishShorteningListener;
pub use subscription_expired::SubscriptionExpiredListener;
