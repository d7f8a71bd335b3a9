//! Notebook document model: `.ipynb` round-tripping, the document gate, and
//! flat-script renderings.

pub mod document;
pub mod script;

pub use document::{derived_path, read_checked, Cell, Notebook, ReadStatus, SourceText};
pub use script::{analysis_source, flat_script};
