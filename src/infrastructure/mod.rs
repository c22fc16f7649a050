//! Infrastructure layer for external integrations.
//!
//! This layer implements interfaces defined by the domain layer.
//!
//! # Modules
//!
//! - [`broker`] - Message broker connection, topology and consumers
//! - [`persistence`] - PostgreSQL repository implementations

pub mod broker;
pub mod persistence;
