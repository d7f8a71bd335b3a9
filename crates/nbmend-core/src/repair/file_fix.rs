//! Missing-input repair: resolve the reported path against the notebook's
//! directory, then either create the directory or synthesize file content.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::errors::Result;
use crate::llm::{extract_fenced, TextCompleter};
use crate::notebook::{flat_script, Notebook};

/// Content synthesis is retried until the reply carries non-blank fenced
/// content, up to this many attempts.
const MAX_SYNTHESIS_ATTEMPTS: usize = 3;

/// What the repair did. `resolved_path` is reported even on failure so the
/// controller can clean up partially-created artifacts.
#[derive(Clone, Debug)]
pub struct FileFixReport {
    pub resolved_path: PathBuf,
    pub created: bool,
}

pub struct FileFix<'a> {
    completer: &'a dyn TextCompleter,
}

impl<'a> FileFix<'a> {
    pub fn new(completer: &'a dyn TextCompleter) -> Self {
        FileFix { completer }
    }

    /// Create the missing file or directory next to the notebook.
    ///
    /// A path without a file extension is treated as a directory. For files,
    /// the notebook's flat script is handed to the collaborator as context
    /// and whatever fenced content comes back is written verbatim.
    pub fn apply(&self, nb_path: &Path, missing_path: &str) -> Result<FileFixReport> {
        let resolved_path = resolve_against_notebook(nb_path, missing_path);
        let is_file = resolved_path.extension().is_some();

        if !is_file {
            info!(path = %resolved_path.display(), "creating missing directory");
            let created = std::fs::create_dir_all(&resolved_path).is_ok();
            return Ok(FileFixReport {
                resolved_path,
                created,
            });
        }

        let nb = Notebook::read(nb_path)?;
        let script = flat_script(&nb);

        let mut content = String::new();
        for attempt in 1..=MAX_SYNTHESIS_ATTEMPTS {
            info!(path = missing_path, attempt, "synthesizing input file content");
            let prompt = format!(
                "Generate a sample input file {missing_path} for the source code below. \
                 Format the response with only the needed data between ``` and ```. \
                 Just data and No fluff.\n\n{script}"
            );
            let reply = self.completer.complete(&prompt)?;
            content = extract_fenced(&reply, false);
            if !content.trim().is_empty() {
                break;
            }
        }

        let created = write_with_parents(&resolved_path, &content);
        if !created {
            warn!(path = %resolved_path.display(), "failed to write synthesized file");
        }
        Ok(FileFixReport {
            resolved_path,
            created,
        })
    }
}

/// Relative paths in failure messages are relative to where the notebook
/// ran, which is its own directory.
fn resolve_against_notebook(nb_path: &Path, missing_path: &str) -> PathBuf {
    let missing = Path::new(missing_path);
    if missing.is_absolute() {
        return missing.to_path_buf();
    }
    match nb_path.parent() {
        Some(dir) => dir.join(missing),
        None => missing.to_path_buf(),
    }
}

fn write_with_parents(path: &Path, content: &str) -> bool {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && std::fs::create_dir_all(parent).is_err() {
            return false;
        }
    }
    std::fs::write(path, content).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Result;

    struct CannedCompleter {
        replies: parking_lot::Mutex<Vec<String>>,
        prompts: parking_lot::Mutex<Vec<String>>,
    }

    impl CannedCompleter {
        fn new(replies: &[&str]) -> Self {
            CannedCompleter {
                replies: parking_lot::Mutex::new(
                    replies.iter().map(|s| s.to_string()).collect(),
                ),
                prompts: parking_lot::Mutex::new(Vec::new()),
            }
        }
    }

    impl TextCompleter for CannedCompleter {
        fn complete(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().push(prompt.to_string());
            let mut replies = self.replies.lock();
            Ok(if replies.is_empty() {
                String::new()
            } else {
                replies.remove(0)
            })
        }
    }

    fn write_notebook(dir: &Path) -> PathBuf {
        let path = dir.join("nb.ipynb");
        std::fs::write(
            &path,
            r#"{
  "cells": [{"cell_type": "code", "source": "open('input.csv')", "metadata": {}}],
  "metadata": {"kernelspec": {"name": "python3"}, "language_info": {"name": "python", "version": "3.10"}},
  "nbformat": 4, "nbformat_minor": 5
}"#,
        )
        .unwrap();
        path
    }

    #[test]
    fn extensionless_path_becomes_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nb = write_notebook(dir.path());
        let completer = CannedCompleter::new(&[]);
        let report = FileFix::new(&completer).apply(&nb, "data/raw").unwrap();
        assert!(report.created);
        assert!(report.resolved_path.is_dir());
        assert_eq!(report.resolved_path, dir.path().join("data/raw"));
        assert!(completer.prompts.lock().is_empty());
    }

    #[test]
    fn file_content_is_synthesized_and_written() {
        let dir = tempfile::tempdir().unwrap();
        let nb = write_notebook(dir.path());
        let completer = CannedCompleter::new(&["```\ncol_a,col_b\n1,2\n```"]);
        let report = FileFix::new(&completer).apply(&nb, "input.csv").unwrap();
        assert!(report.created);
        let written = std::fs::read_to_string(&report.resolved_path).unwrap();
        assert_eq!(written, "col_a,col_b\n1,2\n");
        let prompts = completer.prompts.lock();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("input.csv"));
        assert!(prompts[0].contains("open('input.csv')"));
    }

    #[test]
    fn blank_replies_are_retried_up_to_three_times() {
        let dir = tempfile::tempdir().unwrap();
        let nb = write_notebook(dir.path());
        let completer = CannedCompleter::new(&["nothing useful", "```\n\n```", "```\nrow\n```"]);
        let report = FileFix::new(&completer).apply(&nb, "input.csv").unwrap();
        assert!(report.created);
        assert_eq!(completer.prompts.lock().len(), 3);
        assert_eq!(
            std::fs::read_to_string(&report.resolved_path).unwrap(),
            "row\n"
        );
    }

    #[test]
    fn exhausted_attempts_still_write_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let nb = write_notebook(dir.path());
        let completer = CannedCompleter::new(&["", "", ""]);
        let report = FileFix::new(&completer).apply(&nb, "input.csv").unwrap();
        assert!(report.created);
        assert_eq!(completer.prompts.lock().len(), 3);
        assert_eq!(std::fs::read_to_string(&report.resolved_path).unwrap(), "");
    }

    #[test]
    fn absolute_missing_path_is_used_as_is() {
        let dir = tempfile::tempdir().unwrap();
        let nb = write_notebook(dir.path());
        let target = dir.path().join("elsewhere").join("data.csv");
        let completer = CannedCompleter::new(&["```\nv\n```"]);
        let report = FileFix::new(&completer)
            .apply(&nb, target.to_str().unwrap())
            .unwrap();
        assert!(report.created);
        assert_eq!(report.resolved_path, target);
        assert!(target.is_file());
    }
}
