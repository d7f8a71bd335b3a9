//! Persistent result/error cache.

pub mod database;
pub mod schema;

pub use database::{ErrorRecord, ResultStore};
