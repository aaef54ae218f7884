//! Shared types, error definitions, and utilities used across all relay crates.

pub mod error;
pub mod time;

pub use error::{Context, Error, FromMessage, Result};

/// Generate a fresh opaque id (connection ids, message ids, ack ids).
#[must_use]
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
