//! Helpers for link creation.
//!
//! - [`code_generator`] - Short code generation and alias validation
//! - [`url_normalizer`] - Destination URL normalization

pub mod code_generator;
pub mod url_normalizer;
