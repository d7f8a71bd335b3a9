//! Undefined-variable repair for names with no accessible definition
//! anywhere: synthesize a definition cell and insert it immediately before
//! the cell that uses the name.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::errors::Result;
use crate::llm::{extract_fenced, TextCompleter};
use crate::notebook::{derived_path, flat_script, Cell, Notebook};

const NAMEFIX_SUFFIX: &str = "_namefix";

pub struct NameFix<'a> {
    completer: &'a dyn TextCompleter,
}

impl<'a> NameFix<'a> {
    pub fn new(completer: &'a dyn TextCompleter) -> Self {
        NameFix { completer }
    }

    /// Produce a new notebook file with a synthesized definition for
    /// `variable` inserted before logical cell `use_cell`. The original file
    /// is left untouched.
    pub fn apply(&self, nb_path: &Path, variable: &str, use_cell: i64) -> Result<PathBuf> {
        let nb = Notebook::read(nb_path)?;
        let script = flat_script(&nb);

        let prompt = format!(
            "Generate code cell containing a definition (not None) for undefined \
             variable {variable} in cell {use_cell} of the source code below. \
             Provide the corrected code between ``` and ```. No fluff.\n\n{script}"
        );
        let reply = self.completer.complete(&prompt)?;
        let definition = extract_fenced(&reply, true);

        let raw_index = nb.raw_index_of_logical(use_cell).unwrap_or(0);
        let repaired = nb.with_cell_inserted(raw_index, Cell::code(&definition));

        let out_path = derived_path(nb_path, NAMEFIX_SUFFIX);
        repaired.write(&out_path)?;
        info!(variable, use_cell, out = %out_path.display(), "definition cell inserted");
        Ok(out_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Result;

    struct FixedCompleter(String);

    impl TextCompleter for FixedCompleter {
        fn complete(&self, _prompt: &str) -> Result<String> {
            Ok(self.0.clone())
        }
    }

    fn write_notebook(dir: &Path) -> PathBuf {
        let path = dir.join("nb.ipynb");
        std::fs::write(
            &path,
            r#"{
  "cells": [
    {"cell_type": "markdown", "source": "intro", "metadata": {}},
    {"cell_type": "code", "source": "a = 1", "metadata": {}},
    {"cell_type": "code", "source": "print(y)", "metadata": {}}
  ],
  "metadata": {"kernelspec": {"name": "python3"}, "language_info": {"name": "python", "version": "3.10"}},
  "nbformat": 4, "nbformat_minor": 5
}"#,
        )
        .unwrap();
        path
    }

    #[test]
    fn definition_cell_lands_before_the_use_cell() {
        let dir = tempfile::tempdir().unwrap();
        let nb_path = write_notebook(dir.path());
        let completer = FixedCompleter("```\n# chosen value\ny = 5\n```".to_string());

        let out = NameFix::new(&completer).apply(&nb_path, "y", 2).unwrap();
        assert_eq!(out, dir.path().join("nb_namefix.ipynb"));

        let repaired = Notebook::read(&out).unwrap();
        // markdown, a = 1, synthesized, print(y)
        assert_eq!(repaired.cells.len(), 4);
        assert_eq!(repaired.cells[2].source.joined(), "y = 5\n");
        assert_eq!(repaired.cells[3].source.joined(), "print(y)");

        // Comment lines from the reply are dropped, the original untouched.
        assert!(!repaired.cells[2].source.joined().contains('#'));
        assert_eq!(Notebook::read(&nb_path).unwrap().cells.len(), 3);
    }

    #[test]
    fn unlocatable_use_cell_inserts_at_front() {
        let dir = tempfile::tempdir().unwrap();
        let nb_path = write_notebook(dir.path());
        let completer = FixedCompleter("```\ny = 5\n```".to_string());

        let out = NameFix::new(&completer).apply(&nb_path, "y", 0).unwrap();
        let repaired = Notebook::read(&out).unwrap();
        assert_eq!(repaired.cells[0].source.joined(), "y = 5\n");
    }
}
