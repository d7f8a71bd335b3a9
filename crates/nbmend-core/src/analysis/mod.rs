//! Static scope analysis over notebook code cells.
//!
//! The pass computes, for every non-empty code cell, which variables it
//! defines and uses and in which lexical scopes, then answers accessibility
//! queries between a use site and candidate definition sites in later cells.

pub mod parser;
pub mod resolver;
pub mod visitor;

pub use parser::{parse, parses_cleanly};
pub use resolver::{is_accessible, NotebookScopes, Resolution, VarLocation};
pub use visitor::{analyze_source, CellScopes, MODULE_SCOPE};
