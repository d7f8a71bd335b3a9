//! Execution collaborator: run a notebook end-to-end and report how it
//! failed, if it did.
//!
//! The default implementation shells out to papermill. The wall-clock bound
//! is enforced here, not in the child: the child is polled and killed at the
//! deadline, and a kill is reported as a timeout rather than a raised
//! failure so the classifier never sees partial output from a killed run.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::errors::{Error, Result};

/// Default wall-clock budget for one execution attempt.
pub const DEFAULT_EXECUTION_TIMEOUT_SECS: u64 = 300;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[cfg(windows)]
const NULL_DEVICE: &str = "NUL";
#[cfg(not(windows))]
const NULL_DEVICE: &str = "/dev/null";

/// Result of one execution attempt. `Raised` carries the interpreter's
/// failure text, including its per-cell index markers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExecResult {
    Completed,
    TimedOut,
    Raised(String),
}

/// Runs one notebook to completion or failure.
pub trait NotebookExecutor {
    fn execute(&self, path: &Path, timeout: Duration, workdir: &Path) -> Result<ExecResult>;
}

// ---------------------------------------------------------------------------
// Papermill implementation
// ---------------------------------------------------------------------------

/// Executes notebooks with `python -m papermill`.
pub struct PapermillExecutor {
    pub python: String,
    pub kernel: String,
    /// Where the executed copy goes; `None` means the null device (dry run).
    pub output_target: Option<PathBuf>,
}

impl Default for PapermillExecutor {
    fn default() -> Self {
        PapermillExecutor {
            python: "python3".to_string(),
            kernel: "python3".to_string(),
            output_target: None,
        }
    }
}

impl NotebookExecutor for PapermillExecutor {
    fn execute(&self, path: &Path, timeout: Duration, workdir: &Path) -> Result<ExecResult> {
        let output = self
            .output_target
            .clone()
            .unwrap_or_else(|| PathBuf::from(NULL_DEVICE));

        debug!(notebook = %path.display(), timeout_secs = timeout.as_secs(), "executing notebook");
        let mut child = Command::new(&self.python)
            .arg("-m")
            .arg("papermill")
            .arg("--no-progress-bar")
            .arg("-k")
            .arg(&self.kernel)
            .arg("--cwd")
            .arg(workdir)
            .arg(path)
            .arg(&output)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::Execution(format!("failed to spawn papermill: {e}")))?;

        let start = Instant::now();
        loop {
            let status = child
                .try_wait()
                .map_err(|e| Error::Execution(format!("failed to poll papermill: {e}")))?;
            if status.is_some() {
                break;
            }
            if start.elapsed() > timeout {
                warn!(notebook = %path.display(), "execution timed out, killing child");
                let _ = child.kill();
                let _ = child.wait();
                return Ok(ExecResult::TimedOut);
            }
            std::thread::sleep(POLL_INTERVAL);
        }

        let output = child
            .wait_with_output()
            .map_err(|e| Error::Execution(format!("failed to collect papermill output: {e}")))?;

        if output.status.success() {
            return Ok(ExecResult::Completed);
        }

        let mut failure_text = String::from_utf8_lossy(&output.stderr).to_string();
        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.trim().is_empty() {
            failure_text.push('\n');
            failure_text.push_str(&stdout);
        }
        Ok(ExecResult::Raised(failure_text))
    }
}
