//! Undefined-variable repair for forward references: the definition exists
//! in a later cell, so reorder the cells until the definition executes
//! strictly before the use.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::errors::{Error, Result};
use crate::notebook::{derived_path, Notebook};

const REORDER_SUFFIX: &str = "_reordered";

/// Produce a new notebook file where the cell that defines the variable
/// (logical index `defined_cell`) runs before the cell that uses it
/// (logical index `use_cell`): the defining cell swaps with the use cell's
/// predecessor, or moves to the front when the use cell is first.
pub fn apply(nb_path: &Path, defined_cell: i64, use_cell: i64) -> Result<PathBuf> {
    let nb = Notebook::read(nb_path)?;

    let def_raw = nb.raw_index_of_logical(defined_cell).ok_or_else(|| {
        Error::Notebook(format!("no code cell with logical index {defined_cell}"))
    })?;
    let use_raw = nb
        .raw_index_of_logical(use_cell)
        .ok_or_else(|| Error::Notebook(format!("no code cell with logical index {use_cell}")))?;

    let repaired = if use_raw == 0 {
        nb.with_cell_moved_to_front(def_raw)
    } else {
        nb.with_cells_swapped(use_raw - 1, def_raw)
    };

    let out_path = derived_path(nb_path, REORDER_SUFFIX);
    repaired.write(&out_path)?;
    info!(defined_cell, use_cell, out = %out_path.display(), "cells reordered");
    Ok(out_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_notebook(dir: &Path, sources: &[&str]) -> PathBuf {
        let cells: Vec<String> = sources
            .iter()
            .map(|s| format!(r#"{{"cell_type": "code", "source": "{s}", "metadata": {{}}}}"#))
            .collect();
        let json = format!(
            r#"{{
  "cells": [{}],
  "metadata": {{"kernelspec": {{"name": "python3"}}, "language_info": {{"name": "python", "version": "3.10"}}}},
  "nbformat": 4, "nbformat_minor": 5
}}"#,
            cells.join(",\n")
        );
        let path = dir.join("nb.ipynb");
        std::fs::write(&path, json).unwrap();
        path
    }

    fn logical_position(nb: &Notebook, source: &str) -> usize {
        nb.code_cells()
            .position(|c| c.source.joined() == source)
            .unwrap()
    }

    #[test]
    fn definition_runs_before_use_after_repair() {
        let dir = tempfile::tempdir().unwrap();
        // use of x in cell 2, definition in cell 4
        let nb_path = write_notebook(dir.path(), &["a = 1", "print(x)", "b = 2", "x = 9"]);

        let out = apply(&nb_path, 4, 2).unwrap();
        assert_eq!(out, dir.path().join("nb_reordered.ipynb"));

        let repaired = Notebook::read(&out).unwrap();
        let def_pos = logical_position(&repaired, "x = 9");
        let use_pos = logical_position(&repaired, "print(x)");
        assert!(def_pos < use_pos);

        // Original ordering is untouched.
        let original = Notebook::read(&nb_path).unwrap();
        assert_eq!(original.cells[3].source.joined(), "x = 9");
    }

    #[test]
    fn first_cell_use_moves_definition_to_front() {
        let dir = tempfile::tempdir().unwrap();
        let nb_path = write_notebook(dir.path(), &["print(x)", "y = 2", "x = 9"]);

        let out = apply(&nb_path, 3, 1).unwrap();
        let repaired = Notebook::read(&out).unwrap();
        assert_eq!(repaired.cells[0].source.joined(), "x = 9");
        let def_pos = logical_position(&repaired, "x = 9");
        let use_pos = logical_position(&repaired, "print(x)");
        assert!(def_pos < use_pos);
    }

    #[test]
    fn unknown_logical_index_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let nb_path = write_notebook(dir.path(), &["print(x)"]);
        assert!(apply(&nb_path, 7, 1).is_err());
    }
}
