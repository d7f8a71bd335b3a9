//! In-memory notebook document model and `.ipynb` round-tripping.
//!
//! A notebook is an ordered cell sequence; cell ordering is the sole
//! determinant of execution order. Repairs never mutate a document in place:
//! every structural edit returns a new `Notebook` value that is saved under a
//! derived path.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::errors::{Error, Result};

fn empty_object() -> Value {
    Value::Object(Map::new())
}

// ---------------------------------------------------------------------------
// Cell source representation
// ---------------------------------------------------------------------------

/// Cell source as stored on disk: a single string, a list of lines, or null.
/// All three occur in the wild; `joined` normalizes to one string.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SourceText {
    Text(String),
    Lines(Vec<String>),
    Null,
}

impl Default for SourceText {
    fn default() -> Self {
        SourceText::Text(String::new())
    }
}

impl SourceText {
    /// Concatenated source. Line arrays in the on-disk format already carry
    /// their trailing newlines, so joining is plain concatenation.
    pub fn joined(&self) -> String {
        match self {
            SourceText::Text(s) => s.clone(),
            SourceText::Lines(lines) => lines.concat(),
            SourceText::Null => String::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Cell
// ---------------------------------------------------------------------------

/// One notebook cell. Unknown fields (outputs, execution_count, id, …) are
/// preserved through `extra` so round-trips never drop data.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Cell {
    pub cell_type: String,
    #[serde(default)]
    pub source: SourceText,
    #[serde(default = "empty_object")]
    pub metadata: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Cell {
    /// Build a fresh code cell. The cell id is derived from the source hash,
    /// which keeps synthesized notebooks deterministic.
    pub fn code(source: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(source.as_bytes());
        let digest = format!("{:x}", hasher.finalize());

        let mut extra = Map::new();
        extra.insert("execution_count".to_string(), Value::Null);
        extra.insert("outputs".to_string(), Value::Array(vec![]));
        extra.insert("id".to_string(), Value::String(digest[..16].to_string()));

        Cell {
            cell_type: "code".to_string(),
            source: SourceText::Text(source.to_string()),
            metadata: empty_object(),
            extra,
        }
    }

    pub fn is_code(&self) -> bool {
        self.cell_type == "code"
    }

    /// A cell is empty when its source contains nothing but whitespace.
    pub fn is_empty(&self) -> bool {
        self.source.joined().split_whitespace().next().is_none()
    }
}

// ---------------------------------------------------------------------------
// Notebook
// ---------------------------------------------------------------------------

/// An ordered cell sequence plus document metadata.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Notebook {
    pub cells: Vec<Cell>,
    #[serde(default = "empty_object")]
    pub metadata: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Notebook {
    /// Read a notebook document from disk. An empty file is rejected before
    /// JSON parsing so the error message stays meaningful.
    pub fn read(path: &Path) -> Result<Notebook> {
        let meta = std::fs::metadata(path)?;
        if meta.len() == 0 {
            return Err(Error::Notebook(format!(
                "notebook file {} is empty",
                path.display()
            )));
        }
        let raw = std::fs::read_to_string(path)?;
        let nb: Notebook = serde_json::from_str(&raw)?;
        Ok(nb)
    }

    /// Write the document as indented JSON.
    pub fn write(&self, path: &Path) -> Result<()> {
        let raw = serde_json::to_string_pretty(self)?;
        std::fs::write(path, raw)?;
        Ok(())
    }

    /// Language identification from document metadata: `(language name,
    /// version, kernel name)`, each `"unknown"` when absent.
    pub fn language_tags(&self) -> (String, String, String) {
        let kernel_name = self
            .metadata
            .pointer("/kernelspec/name")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        let language = self
            .metadata
            .pointer("/language_info/name")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        // Some emitters store the version as a JSON number.
        let version = match self.metadata.pointer("/language_info/version") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => "unknown".to_string(),
        };
        (language, version, kernel_name)
    }

    /// Language gate: Python 3 only. An unknown version is accepted only when
    /// the kernel name says `python3`.
    pub fn is_python3(&self) -> bool {
        let (language, version, kernel_name) = self.language_tags();
        if version == "unknown" {
            return kernel_name.to_lowercase().contains("python3");
        }
        version.starts_with('3') && language.to_lowercase().contains("python")
    }

    /// Non-empty code cells in document order. Logical indices are 1-based
    /// positions in this sequence.
    pub fn code_cells(&self) -> impl Iterator<Item = &Cell> {
        self.cells.iter().filter(|c| c.is_code() && !c.is_empty())
    }

    pub fn total_code_cells(&self) -> i64 {
        self.code_cells().count() as i64
    }

    /// Map a 1-based logical code-cell index to its raw position in `cells`.
    /// Failure messages and the resolver speak in logical indices; structural
    /// edits need raw positions so non-code cells never shift the target.
    pub fn raw_index_of_logical(&self, logical: i64) -> Option<usize> {
        if logical < 1 {
            return None;
        }
        let mut seen = 0i64;
        for (raw, cell) in self.cells.iter().enumerate() {
            if cell.is_code() && !cell.is_empty() {
                seen += 1;
                if seen == logical {
                    return Some(raw);
                }
            }
        }
        None
    }

    /// New notebook with `cell` inserted at raw position `raw_index`.
    pub fn with_cell_inserted(&self, raw_index: usize, cell: Cell) -> Notebook {
        let mut next = self.clone();
        let at = raw_index.min(next.cells.len());
        next.cells.insert(at, cell);
        next
    }

    /// New notebook with the cells at raw positions `a` and `b` exchanged.
    pub fn with_cells_swapped(&self, a: usize, b: usize) -> Notebook {
        let mut next = self.clone();
        if a < next.cells.len() && b < next.cells.len() {
            next.cells.swap(a, b);
        }
        next
    }

    /// New notebook with the cell at `raw_index` moved to the front.
    pub fn with_cell_moved_to_front(&self, raw_index: usize) -> Notebook {
        let mut next = self.clone();
        if raw_index < next.cells.len() {
            let cell = next.cells.remove(raw_index);
            next.cells.insert(0, cell);
        }
        next
    }
}

// ---------------------------------------------------------------------------
// Document pre-validation
// ---------------------------------------------------------------------------

/// Verdict of the document gate run before any execution attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadStatus {
    Ok,
    CannotRead,
    NoCodeCells,
    NonPython,
    ParseError,
}

impl ReadStatus {
    pub fn label(&self) -> &'static str {
        match self {
            ReadStatus::Ok => "Success",
            ReadStatus::CannotRead => "Cannot read",
            ReadStatus::NoCodeCells => "No code cells",
            ReadStatus::NonPython => "Non-Python",
            ReadStatus::ParseError => "Parse error",
        }
    }
}

/// Read a notebook and run the document gate: readable JSON, at least one
/// non-empty code cell, Python 3 metadata, and every code cell parseable.
pub fn read_checked(path: &Path) -> (Option<Notebook>, ReadStatus) {
    let nb = match Notebook::read(path) {
        Ok(nb) => nb,
        Err(_) => return (None, ReadStatus::CannotRead),
    };

    if nb.total_code_cells() == 0 {
        return (Some(nb), ReadStatus::NoCodeCells);
    }

    if !nb.is_python3() {
        return (Some(nb), ReadStatus::NonPython);
    }

    let mut parse_error = false;
    for cell in nb.code_cells() {
        let source = super::script::analysis_source(cell);
        if !source.is_empty() && !crate::analysis::parses_cleanly(&source) {
            parse_error = true;
            break;
        }
    }
    if parse_error {
        return (Some(nb), ReadStatus::ParseError);
    }

    (Some(nb), ReadStatus::Ok)
}

/// Sibling path with a suffix appended to the stem:
/// `a/b/report.ipynb` + `_reordered` → `a/b/report_reordered.ipynb`.
pub fn derived_path(path: &Path, suffix: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "notebook".to_string());
    let file_name = format!("{stem}{suffix}.ipynb");
    match path.parent() {
        Some(dir) => dir.join(file_name),
        None => PathBuf::from(file_name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nb_json(cells: &str) -> String {
        format!(
            r#"{{
  "cells": {cells},
  "metadata": {{
    "kernelspec": {{"name": "python3", "display_name": "Python 3"}},
    "language_info": {{"name": "python", "version": "3.10.2"}}
  }},
  "nbformat": 4,
  "nbformat_minor": 5
}}"#
        )
    }

    fn write_temp(content: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nb.ipynb");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn read_string_and_line_sources() {
        let json = nb_json(
            r#"[
      {"cell_type": "code", "source": "x = 1\n", "metadata": {}, "outputs": [], "execution_count": null},
      {"cell_type": "code", "source": ["y = 2\n", "z = y\n"], "metadata": {}, "outputs": [], "execution_count": null}
    ]"#,
        );
        let (_dir, path) = write_temp(&json);
        let nb = Notebook::read(&path).unwrap();
        assert_eq!(nb.cells[0].source.joined(), "x = 1\n");
        assert_eq!(nb.cells[1].source.joined(), "y = 2\nz = y\n");
        assert_eq!(nb.total_code_cells(), 2);
    }

    #[test]
    fn round_trip_preserves_extra_fields() {
        let json = nb_json(
            r#"[
      {"cell_type": "code", "source": "x = 1", "metadata": {}, "outputs": [], "execution_count": 3, "id": "abc"}
    ]"#,
        );
        let (_dir, path) = write_temp(&json);
        let nb = Notebook::read(&path).unwrap();
        let out = dir_write(&nb, path.parent().unwrap());
        let back = Notebook::read(&out).unwrap();
        assert_eq!(back.cells[0].extra.get("execution_count").unwrap(), 3);
        assert_eq!(
            back.cells[0].extra.get("id").unwrap().as_str().unwrap(),
            "abc"
        );
        assert_eq!(back.extra.get("nbformat").unwrap(), 4);
    }

    fn dir_write(nb: &Notebook, dir: &Path) -> PathBuf {
        let out = dir.join("out.ipynb");
        nb.write(&out).unwrap();
        out
    }

    #[test]
    fn empty_file_is_rejected() {
        let (_dir, path) = write_temp("");
        assert!(Notebook::read(&path).is_err());
    }

    #[test]
    fn logical_index_skips_markdown_and_empty_cells() {
        let json = nb_json(
            r##"[
      {"cell_type": "markdown", "source": "# title", "metadata": {}},
      {"cell_type": "code", "source": "a = 1", "metadata": {}, "outputs": [], "execution_count": null},
      {"cell_type": "code", "source": "   ", "metadata": {}, "outputs": [], "execution_count": null},
      {"cell_type": "code", "source": "b = a", "metadata": {}, "outputs": [], "execution_count": null}
    ]"##,
        );
        let (_dir, path) = write_temp(&json);
        let nb = Notebook::read(&path).unwrap();
        assert_eq!(nb.total_code_cells(), 2);
        assert_eq!(nb.raw_index_of_logical(1), Some(1));
        assert_eq!(nb.raw_index_of_logical(2), Some(3));
        assert_eq!(nb.raw_index_of_logical(3), None);
    }

    #[test]
    fn language_gate() {
        let ok = nb_json(r#"[{"cell_type": "code", "source": "x=1", "metadata": {}}]"#);
        let (_dir, path) = write_temp(&ok);
        assert!(Notebook::read(&path).unwrap().is_python3());

        let py2 = ok.replace("3.10.2", "2.7.18");
        let (_dir2, path2) = write_temp(&py2);
        assert!(!Notebook::read(&path2).unwrap().is_python3());

        let r = ok.replace("python", "ir").replace("3.10.2", "4.1");
        let (_dir3, path3) = write_temp(&r);
        assert!(!Notebook::read(&path3).unwrap().is_python3());
    }

    #[test]
    fn unknown_version_accepted_only_for_python3_kernel() {
        let json = r#"{
  "cells": [{"cell_type": "code", "source": "x=1", "metadata": {}}],
  "metadata": {"kernelspec": {"name": "python3"}},
  "nbformat": 4,
  "nbformat_minor": 5
}"#;
        let (_dir, path) = write_temp(json);
        assert!(Notebook::read(&path).unwrap().is_python3());

        let other = json.replace("python3", "ir");
        let (_dir2, path2) = write_temp(&other);
        assert!(!Notebook::read(&path2).unwrap().is_python3());
    }

    #[test]
    fn read_checked_flags_syntax_errors() {
        let json = nb_json(
            r#"[{"cell_type": "code", "source": "def f(:", "metadata": {}, "outputs": [], "execution_count": null}]"#,
        );
        let (_dir, path) = write_temp(&json);
        let (_, status) = read_checked(&path);
        assert_eq!(status, ReadStatus::ParseError);
    }

    #[test]
    fn read_checked_accepts_clean_notebook() {
        let json = nb_json(
            r#"[{"cell_type": "code", "source": "x = 1\nprint(x)", "metadata": {}, "outputs": [], "execution_count": null}]"#,
        );
        let (_dir, path) = write_temp(&json);
        let (nb, status) = read_checked(&path);
        assert_eq!(status, ReadStatus::Ok);
        assert!(nb.is_some());
    }

    #[test]
    fn structural_edits_return_new_values() {
        let json = nb_json(
            r#"[
      {"cell_type": "code", "source": "a = 1", "metadata": {}},
      {"cell_type": "code", "source": "b = 2", "metadata": {}}
    ]"#,
        );
        let (_dir, path) = write_temp(&json);
        let nb = Notebook::read(&path).unwrap();

        let inserted = nb.with_cell_inserted(1, Cell::code("c = 3"));
        assert_eq!(nb.cells.len(), 2);
        assert_eq!(inserted.cells.len(), 3);
        assert_eq!(inserted.cells[1].source.joined(), "c = 3");

        let swapped = nb.with_cells_swapped(0, 1);
        assert_eq!(swapped.cells[0].source.joined(), "b = 2");
        assert_eq!(nb.cells[0].source.joined(), "a = 1");

        let fronted = nb.with_cell_moved_to_front(1);
        assert_eq!(fronted.cells[0].source.joined(), "b = 2");
    }

    #[test]
    fn derived_path_appends_suffix() {
        let p = derived_path(Path::new("/tmp/work/report.ipynb"), "_reordered");
        assert_eq!(p, PathBuf::from("/tmp/work/report_reordered.ipynb"));
    }

    #[test]
    fn code_cell_constructor_shape() {
        let cell = Cell::code("x = 1\n");
        assert!(cell.is_code());
        assert!(!cell.is_empty());
        assert_eq!(cell.extra.get("execution_count").unwrap(), &Value::Null);
        assert!(cell.extra.get("outputs").unwrap().as_array().unwrap().is_empty());
        assert!(cell.extra.get("id").is_some());
    }
}
