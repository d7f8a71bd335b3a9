//! Cross-cell scope resolution.
//!
//! A definition made at a cell's module scope is visible to every later
//! cell; definitions inside function, lambda, or comprehension scopes die
//! with their cell. The resolver's job is to decide, for a variable the
//! interpreter reported as undefined, whether an accessible definition exists
//! in a *later* cell (the notebook was authored out of order) or nowhere at
//! all; two structurally different repairs hang off that distinction.

use std::path::Path;

use indexmap::{IndexMap, IndexSet};
use tracing::warn;

use super::visitor::{analyze_source, CellScopes, MODULE_SCOPE};
use crate::errors::{Error, Result};
use crate::notebook::{analysis_source as strip_cell, Notebook};

/// `(cell index, scope id)`, the unit of accessibility comparison.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct VarLocation {
    pub cell: i64,
    pub scope: i64,
}

/// Outcome of a definition search for one undefined variable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resolution {
    /// An accessible definition exists in the given later cell.
    DefinedAfter(i64),
    /// No accessible definition exists anywhere in the notebook.
    Undefined,
}

/// Whether a definition at `def_loc` can satisfy a use at `use_loc`.
///
/// Across cells only module-scope definitions carry over; within a cell a
/// definition is visible when its scope is an ancestor of (or equal to) the
/// use's scope, which the strictly-increasing scope-id assignment reduces to
/// an ordering test.
pub fn is_accessible(def_loc: VarLocation, use_loc: VarLocation) -> bool {
    if def_loc.cell != use_loc.cell {
        return def_loc.scope == MODULE_SCOPE;
    }
    def_loc.scope <= use_loc.scope
}

/// Definition/use maps for every non-empty code cell of one notebook,
/// keyed by 1-based logical index.
#[derive(Clone, Debug, Default)]
pub struct NotebookScopes {
    cells: IndexMap<i64, CellScopes>,
    /// Names bound at module scope by any cell, accumulated in cell order.
    pub global_names: IndexSet<String>,
}

impl NotebookScopes {
    /// Analyze every non-empty code cell in logical order, threading the
    /// accumulating global-scope set through the per-cell calls. A cell that
    /// fails to parse aborts the whole pass.
    pub fn from_notebook(nb: &Notebook) -> Result<NotebookScopes> {
        let mut scopes = NotebookScopes::default();
        let mut global_names = IndexSet::new();
        for (i, cell) in nb.code_cells().enumerate() {
            let logical = i as i64 + 1;
            let source = strip_cell(cell);
            let cell_scopes = analyze_cell(&source, &mut global_names, logical)?;
            scopes.cells.insert(logical, cell_scopes);
        }
        scopes.global_names = global_names;
        Ok(scopes)
    }

    /// Read the notebook from disk and analyze it. The result is a pure
    /// function of the file's current content.
    pub fn from_path(path: &Path) -> Result<NotebookScopes> {
        let nb = Notebook::read(path)?;
        Self::from_notebook(&nb)
    }

    /// Scope ids in which `name` is used within `cell` (empty when none).
    pub fn use_scopes(&self, name: &str, cell: i64) -> Vec<i64> {
        self.cells
            .get(&cell)
            .and_then(|c| c.uses.get(name))
            .cloned()
            .unwrap_or_default()
    }

    /// Search for a definition of `name` that could satisfy its use in
    /// `use_cell`, looking only at later cells.
    ///
    /// Candidates must be accessible from some recorded use scope under
    /// [`is_accessible`]; among qualifying candidates the lexicographically
    /// smallest `(cell, scope)` wins.
    pub fn find_one_variable_definition(&self, name: &str, use_cell: i64) -> Resolution {
        let use_scopes = self.use_scopes(name, use_cell);
        if use_scopes.is_empty() {
            warn!(variable = name, cell = use_cell, "no recorded use for variable");
            return Resolution::Undefined;
        }

        let mut later_defs: Vec<VarLocation> = Vec::new();
        for &use_scope in &use_scopes {
            let use_loc = VarLocation {
                cell: use_cell,
                scope: use_scope,
            };
            for (&def_cell, cell_scopes) in &self.cells {
                let Some(def_scopes) = cell_scopes.defs.get(name) else {
                    continue;
                };
                for &def_scope in def_scopes {
                    let def_loc = VarLocation {
                        cell: def_cell,
                        scope: def_scope,
                    };
                    if def_cell > use_cell && is_accessible(def_loc, use_loc) {
                        later_defs.push(def_loc);
                    }
                }
            }
        }

        match later_defs.iter().min() {
            Some(earliest) => Resolution::DefinedAfter(earliest.cell),
            None => Resolution::Undefined,
        }
    }
}

/// Analyze one cell and merge its module-scope definitions into the running
/// global-scope set.
fn analyze_cell(
    source: &str,
    global_names: &mut IndexSet<String>,
    cell_number: i64,
) -> Result<CellScopes> {
    let cell_scopes = analyze_source(source)
        .map_err(|e| Error::Parse(format!("cell {cell_number}: {e}")))?;
    for (name, scopes) in &cell_scopes.defs {
        if scopes.contains(&MODULE_SCOPE) {
            global_names.insert(name.clone());
        }
    }
    Ok(cell_scopes)
}
