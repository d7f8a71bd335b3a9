//! nbmend core library: analyze notebooks that fail to execute, classify
//! the failure, and attempt automated repair.
//!
//! The crate is organised around the repair loop: [`repair::RepairLoop`]
//! drives execute → classify → repair cycles, consulting the static
//! [`analysis`] scope resolver to choose between NameError strategies, the
//! [`classify`] matcher cascade to structure failures, and the collaborator
//! traits in [`exec`], [`llm`], and [`pkg`] for everything that touches the
//! outside world. [`store`] and [`report`] persist and summarize results.

pub mod analysis;
pub mod classify;
pub mod errors;
pub mod exec;
pub mod llm;
pub mod models;
pub mod notebook;
pub mod pkg;
pub mod repair;
pub mod report;
pub mod store;

pub use errors::{Error, Result};
