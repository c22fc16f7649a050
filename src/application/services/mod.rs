//! Business logic services for the application layer.

pub mod account_service;
pub mod shortening_service;
pub mod subscription_service;

pub use account_service::AccountService;
pub use shortening_service::ShorteningService;
pub use subscription_service::SubscriptionService;
