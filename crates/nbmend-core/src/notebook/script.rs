//! Flat-script views of a notebook.
//!
//! Two renderings are needed: a per-cell source stripped of notebook-only
//! line prefixes (shell escapes, magics) for static analysis, and a whole
//! notebook script with per-cell index headers used as prompt context for the
//! generative-text collaborator.

use super::document::{Cell, Notebook};

/// Line prefixes that are not Python and must not reach the parser.
const NON_PYTHON_PREFIXES: &[char] = &['!', '%', '#', '$', '-'];

/// Cell source with shell/magic/comment lines removed, trailing whitespace
/// trimmed. Only unindented prefixes count; indented code is left alone.
pub fn analysis_source(cell: &Cell) -> String {
    let joined = cell.source.joined();
    let mut source = String::new();
    for line in joined.lines() {
        if line.starts_with(NON_PYTHON_PREFIXES) {
            continue;
        }
        source.push_str(line);
        source.push('\n');
    }
    source.trim_end().to_string()
}

/// Whole-notebook script: every non-empty code cell, each preceded by its
/// logical-index header. This is what failure messages and prompts refer to.
pub fn flat_script(nb: &Notebook) -> String {
    let mut script = String::new();
    for (i, cell) in nb.code_cells().enumerate() {
        let logical = i as i64 + 1;
        script.push_str(&format!("# In[{logical}]:\n"));
        let source = cell.source.joined();
        script.push_str(&source);
        if !source.ends_with('\n') {
            script.push('\n');
        }
        script.push('\n');
    }
    script
}
