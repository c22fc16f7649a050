//! Core domain entities.
//!
//! - [`User`] - A registered account
//! - [`Link`] - A shortened link and its activation rules
//! - [`Subscription`] - A user's plan expiry
//! - [`Perk`] - Limits granted by a plan, inferred by [`PerkInferer`]

pub mod link;
pub mod perk;
pub mod subscription;
pub mod user;

pub use link::{Activation, Link, NewLink, decide_activation, plan_deactivation};
pub use perk::{Perk, PerkInferer};
pub use subscription::Subscription;
pub use user::{NewUser, User};
