//! The repair loop: execute → classify → repair → re-execute until the
//! notebook succeeds, a guard trips, or a strategy gives up.
//!
//! The loop is an explicit state machine. Two named guards bound it:
//! `is_repeated_resource` (the same missing module or path reappearing after
//! its repair means the fix did not take effect) and `is_non_progressing`
//! (a NameError must fail strictly later than the previous one). Synthesized
//! files and intermediate notebooks are tracked and removed on every exit
//! path, fatal aborts included.

use std::path::{Path, PathBuf};
use std::time::Duration;

use indexmap::IndexSet;
use tracing::{debug, info, warn};

use crate::analysis::{NotebookScopes, Resolution};
use crate::classify::Classifier;
use crate::errors::{Error, Result};
use crate::exec::{NotebookExecutor, DEFAULT_EXECUTION_TIMEOUT_SECS};
use crate::llm::TextCompleter;
use crate::models::{
    AstStatus, ExecutionOutcome, ExecutionStatus, NameResolution, RepairArtifact, RepairRecord,
    StrategyKind,
};
use crate::notebook::{read_checked, ReadStatus};
use crate::pkg::PackageInstaller;

use super::file_fix::FileFix;
use super::module_fix::{root_package, ModuleFix, ModuleFixResult};
use super::name_fix::NameFix;
use super::reorder;

// ---------------------------------------------------------------------------
// Guards
// ---------------------------------------------------------------------------

/// The identical missing resource recurring after a repair attempt means the
/// fix did not take effect.
fn is_repeated_resource(seen: &IndexSet<String>, resource: &str) -> bool {
    seen.contains(resource)
}

/// A NameError repair made progress only if the new failing cell is strictly
/// later than the previous NameError's failing cell.
fn is_non_progressing(previous_cell: Option<i64>, current_cell: i64) -> bool {
    matches!(previous_cell, Some(prev) if current_cell <= prev)
}

// ---------------------------------------------------------------------------
// Run result
// ---------------------------------------------------------------------------

/// Aggregated result of one repair-loop run.
#[derive(Debug)]
pub struct RepairRun {
    /// One entry per execution attempt, in order.
    pub history: Vec<ExecutionOutcome>,
    /// One entry per repair applied.
    pub repairs: Vec<RepairRecord>,
    pub ast_status: AstStatus,
    /// Root package names an install was attempted for, plus corrected names
    /// that installed.
    pub installed_modules: IndexSet<String>,
    pub err_in_file_creation: Option<String>,
    pub module_fix_llm_attempts: i64,
    pub module_fix_llm_successes: i64,
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

enum State {
    Execute { path: PathBuf },
    Dispatch { path: PathBuf, outcome: ExecutionOutcome },
    Terminal,
}

#[derive(Default)]
struct LoopCtl {
    history: Vec<ExecutionOutcome>,
    repairs: Vec<RepairRecord>,
    installed_modules: IndexSet<String>,
    missing_files_seen: IndexSet<String>,
    resolutions: Vec<NameResolution>,
    prev_name_error_cell: Option<i64>,
    err_in_file_creation: Option<String>,
    module_fix_llm_attempts: i64,
    module_fix_llm_successes: i64,
}

/// Everything a repair produces on disk, removed unconditionally when the
/// run ends.
#[derive(Default)]
struct ArtifactTracker {
    created_paths: IndexSet<PathBuf>,
    repaired_notebooks: IndexSet<PathBuf>,
}

impl ArtifactTracker {
    fn track_created(&mut self, path: PathBuf) {
        self.created_paths.insert(path);
    }

    fn track_notebook(&mut self, path: PathBuf) {
        self.repaired_notebooks.insert(path);
    }

    fn cleanup(&mut self) {
        for path in self.created_paths.drain(..) {
            if path.is_dir() {
                if let Err(e) = std::fs::remove_dir_all(&path) {
                    warn!(path = %path.display(), error = %e, "failed to remove directory");
                }
            } else if path.exists() {
                if let Err(e) = std::fs::remove_file(&path) {
                    warn!(path = %path.display(), error = %e, "failed to remove file");
                }
            }
        }
        for path in self.repaired_notebooks.drain(..) {
            if path.exists() {
                if let Err(e) = std::fs::remove_file(&path) {
                    warn!(path = %path.display(), error = %e, "failed to remove notebook");
                }
            }
        }
    }
}

impl Drop for ArtifactTracker {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Drives the execute/classify/repair cycle for one notebook.
pub struct RepairLoop<'a> {
    executor: &'a dyn NotebookExecutor,
    completer: &'a dyn TextCompleter,
    installer: &'a dyn PackageInstaller,
    timeout: Duration,
}

impl<'a> RepairLoop<'a> {
    pub fn new(
        executor: &'a dyn NotebookExecutor,
        completer: &'a dyn TextCompleter,
        installer: &'a dyn PackageInstaller,
    ) -> Self {
        RepairLoop {
            executor,
            completer,
            installer,
            timeout: Duration::from_secs(DEFAULT_EXECUTION_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run the loop to a terminal state. Fatal errors (disk exhaustion,
    /// classifier contract violations) surface as `Err`; everything else
    /// ends gracefully with the full history. Artifacts are removed on every
    /// exit path.
    pub fn run(&self, nb_path: &Path) -> Result<RepairRun> {
        let mut ctl = LoopCtl::default();
        let mut artifacts = ArtifactTracker::default();
        let result = self.drive(nb_path, &mut ctl, &mut artifacts);
        artifacts.cleanup();
        result?;
        Ok(RepairRun {
            ast_status: AstStatus::from_resolutions(&ctl.resolutions),
            history: ctl.history,
            repairs: ctl.repairs,
            installed_modules: ctl.installed_modules,
            err_in_file_creation: ctl.err_in_file_creation,
            module_fix_llm_attempts: ctl.module_fix_llm_attempts,
            module_fix_llm_successes: ctl.module_fix_llm_successes,
        })
    }

    fn drive(
        &self,
        nb_path: &Path,
        ctl: &mut LoopCtl,
        artifacts: &mut ArtifactTracker,
    ) -> Result<()> {
        let mut state = State::Execute {
            path: nb_path.to_path_buf(),
        };

        loop {
            state = match state {
                State::Execute { path } => {
                    let outcome = self.execute_once(&path)?;
                    debug!(status = %outcome.status.label(), cell = outcome.err_cell_num, "execution classified");
                    ctl.history.push(outcome.clone());
                    State::Dispatch { path, outcome }
                }

                State::Dispatch { path, outcome } => match outcome.status.clone() {
                    ExecutionStatus::FileNotFound { missing_path } => {
                        self.dispatch_file_not_found(ctl, artifacts, path, outcome, missing_path)?
                    }
                    ExecutionStatus::ModuleNotFound { missing_module } => {
                        self.dispatch_module_not_found(ctl, path, outcome, missing_module)?
                    }
                    ExecutionStatus::NameError { undefined_name } => {
                        self.dispatch_name_error(ctl, artifacts, path, outcome, undefined_name)?
                    }
                    _ => State::Terminal,
                },

                State::Terminal => return Ok(()),
            };
        }
    }

    /// One execution attempt: document gate, collaborator call,
    /// classification.
    fn execute_once(&self, path: &Path) -> Result<ExecutionOutcome> {
        let nb = match read_checked(path) {
            (Some(nb), ReadStatus::Ok) => nb,
            (_, status) => {
                return Err(Error::Notebook(format!(
                    "{} in {}",
                    status.label(),
                    path.display()
                )))
            }
        };
        let total_code_cells = nb.total_code_cells();

        let workdir = path.parent().unwrap_or_else(|| Path::new("."));
        let result = self.executor.execute(path, self.timeout, workdir)?;
        Classifier::new(self.completer).classify(&result, total_code_cells)
    }

    fn dispatch_file_not_found(
        &self,
        ctl: &mut LoopCtl,
        artifacts: &mut ArtifactTracker,
        path: PathBuf,
        outcome: ExecutionOutcome,
        missing_path: String,
    ) -> Result<State> {
        if is_repeated_resource(&ctl.missing_files_seen, &missing_path) {
            warn!(missing_path = %missing_path, "missing path reappeared after repair");
            ctl.err_in_file_creation =
                Some(format!("file creation problem with {missing_path}"));
            return Ok(State::Terminal);
        }
        ctl.missing_files_seen.insert(missing_path.clone());

        info!(missing_path = %missing_path, "repairing missing input");
        let report = FileFix::new(self.completer).apply(&path, &missing_path)?;
        artifacts.track_created(report.resolved_path.clone());
        ctl.repairs.push(RepairRecord {
            trigger: outcome,
            strategy: StrategyKind::SynthesizeFile,
            artifact: RepairArtifact::CreatedPath(report.resolved_path.display().to_string()),
        });

        if report.created {
            Ok(State::Execute { path })
        } else {
            ctl.err_in_file_creation =
                Some(format!("file creation problem with {missing_path}"));
            Ok(State::Terminal)
        }
    }

    fn dispatch_module_not_found(
        &self,
        ctl: &mut LoopCtl,
        path: PathBuf,
        outcome: ExecutionOutcome,
        missing_module: String,
    ) -> Result<State> {
        let root = root_package(&missing_module);
        if is_repeated_resource(&ctl.installed_modules, &root) {
            warn!(module = %root, "module missing again after install attempt");
            return Ok(State::Terminal);
        }
        ctl.installed_modules.insert(root.clone());

        let result = ModuleFix::new(self.installer, self.completer).apply(&root)?;
        if result.consulted_llm() {
            ctl.module_fix_llm_attempts += 1;
        }

        let (artifact, next) = match result {
            ModuleFixResult::Installed { module } => (
                RepairArtifact::InstalledModule(module),
                State::Execute { path },
            ),
            ModuleFixResult::Corrected { module } => {
                ctl.module_fix_llm_successes += 1;
                ctl.installed_modules.insert(module.clone());
                (
                    RepairArtifact::InstalledModule(module),
                    State::Execute { path },
                )
            }
            ModuleFixResult::NoCorrection => (RepairArtifact::None, State::Execute { path }),
            ModuleFixResult::RetryFailed { module } => {
                warn!(module = %module, "cannot be installed, ending the loop");
                (RepairArtifact::None, State::Terminal)
            }
        };

        ctl.repairs.push(RepairRecord {
            trigger: outcome,
            strategy: StrategyKind::InstallModule,
            artifact,
        });
        Ok(next)
    }

    fn dispatch_name_error(
        &self,
        ctl: &mut LoopCtl,
        artifacts: &mut ArtifactTracker,
        path: PathBuf,
        mut outcome: ExecutionOutcome,
        undefined_name: String,
    ) -> Result<State> {
        if is_non_progressing(ctl.prev_name_error_cell, outcome.err_cell_num) {
            warn!(
                variable = %undefined_name,
                cell = outcome.err_cell_num,
                "NameError did not progress past the previous one"
            );
            return Ok(State::Terminal);
        }

        // Recomputed from scratch off the current on-disk notebook.
        let scopes = match NotebookScopes::from_path(&path) {
            Ok(scopes) => scopes,
            Err(e) => {
                warn!(error = %e, "scope analysis failed, ending the loop");
                return Ok(State::Terminal);
            }
        };
        let resolution =
            scopes.find_one_variable_definition(&undefined_name, outcome.err_cell_num);
        info!(variable = %undefined_name, cell = outcome.err_cell_num, ?resolution, "NameError resolved");

        let name_resolution = match resolution {
            Resolution::Undefined => NameResolution::Undefined,
            Resolution::DefinedAfter(_) => NameResolution::DefinedAfter,
        };
        outcome.name_resolution = Some(name_resolution);
        if let Some(last) = ctl.history.last_mut() {
            last.name_resolution = Some(name_resolution);
        }
        ctl.resolutions.push(name_resolution);

        let (strategy, new_path) = match resolution {
            Resolution::DefinedAfter(def_cell) if def_cell != outcome.err_cell_num => (
                StrategyKind::ReorderCells,
                reorder::apply(&path, def_cell, outcome.err_cell_num)?,
            ),
            _ => (
                StrategyKind::InsertDefinition,
                NameFix::new(self.completer).apply(
                    &path,
                    &undefined_name,
                    outcome.err_cell_num,
                )?,
            ),
        };

        artifacts.track_notebook(new_path.clone());
        ctl.prev_name_error_cell = Some(outcome.err_cell_num);
        ctl.repairs.push(RepairRecord {
            trigger: outcome,
            strategy,
            artifact: RepairArtifact::NewNotebook(new_path.display().to_string()),
        });
        Ok(State::Execute { path: new_path })
    }
}
