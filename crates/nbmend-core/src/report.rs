//! Run-history aggregation and the produced record schema.

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};
use crate::models::{AstStatus, ExecutionOutcome, ExecutionStatus, NameResolution};
use crate::repair::RepairRun;

/// Per-failure-kind counts and cells gained, computed over a run's history.
#[derive(Clone, Debug, Default)]
pub struct HistoryAggregates {
    pub cells_gained_after_module_fix: i64,
    pub cells_gained_after_file_fix: i64,
    pub cells_gained_after_name_fix: i64,
    pub module_not_found_count: i64,
    pub file_not_found_count: i64,
    pub name_error_count: i64,
    /// Statuses seen during the run, in first-seen order.
    pub unique_statuses: Vec<String>,
    /// The NameError entry reported as the run's final state when the name
    /// fixes netted no gain.
    pub last_unresolved_name_error: Option<ExecutionOutcome>,
}

/// Compare each failure entry with the first later entry whose
/// `err_cell_num` differs and charge the difference to the earlier entry's
/// kind.
///
/// Known ambiguity: when two consecutive outcomes share an error cell for
/// unrelated reasons, the earlier fix's gain is folded into the later
/// comparison and can be under- or over-counted. Revisiting this needs real
/// traces; the scan is kept as-is deliberately.
pub fn aggregate_history(history: &[ExecutionOutcome]) -> HistoryAggregates {
    let mut agg = HistoryAggregates::default();

    let mut unique: IndexSet<String> = IndexSet::new();
    for outcome in history {
        unique.insert(outcome.status.label());
    }
    agg.unique_statuses = unique.into_iter().collect();

    let mut last_name_error_with_gain: Option<&ExecutionOutcome> = None;

    for i in 0..history.len().saturating_sub(1) {
        let d1 = &history[i];

        let mut d2 = &history[i];
        for later in &history[i + 1..] {
            if d2.err_cell_num == d1.err_cell_num {
                d2 = later;
            } else {
                break;
            }
        }

        match &d1.status {
            ExecutionStatus::ModuleNotFound { .. } => {
                agg.cells_gained_after_module_fix += d2.err_cell_num - d1.err_cell_num;
                agg.module_not_found_count += 1;
            }
            ExecutionStatus::FileNotFound { .. } => {
                agg.cells_gained_after_file_fix += d2.err_cell_num - d1.err_cell_num;
                agg.file_not_found_count += 1;
            }
            ExecutionStatus::NameError { .. } => {
                // An inserted definition cell inflates later indices by one.
                let mut true_cell_count = d2.err_cell_num;
                if d1.name_resolution == Some(NameResolution::Undefined) {
                    true_cell_count -= 1;
                }
                let increase = true_cell_count - d1.err_cell_num;
                agg.cells_gained_after_name_fix += increase;
                if increase > 0 {
                    last_name_error_with_gain = Some(d1);
                }
                agg.name_error_count += 1;
            }
            _ => {}
        }
    }

    if agg.cells_gained_after_name_fix <= 0 {
        agg.last_unresolved_name_error = last_name_error_with_gain.cloned();
    }
    agg
}

/// The record produced for one notebook, consumed downstream (cache, CSV).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NotebookReport {
    pub nb_path: String,
    pub initial_total_code_cells: i64,
    pub initial_status: String,
    pub initial_max_executed_cells: i64,
    pub final_total_code_cells: i64,
    pub final_status: String,
    pub final_max_executed_cells: i64,
    pub increased_execution_cells: i64,
    pub increased_execution_percentage: f64,
    pub cells_gained_after_module_fix: i64,
    pub cells_gained_after_file_fix: i64,
    pub cells_gained_after_name_fix: i64,
    pub module_not_found_count: i64,
    pub file_not_found_count: i64,
    pub name_error_count: i64,
    pub unique_statuses: Vec<String>,
    pub installed_modules: Vec<String>,
    pub module_fix_llm_attempts: i64,
    pub module_fix_llm_successes: i64,
    pub ast_status: AstStatus,
    pub file_creation_error: Option<String>,
}

/// Highest cell an outcome actually executed: the cell before the failing
/// one, or the reported cell itself on success (and the -1 timeout sentinel
/// as-is).
fn max_executed_cells(outcome: &ExecutionOutcome) -> i64 {
    if outcome.err_cell_num > 0 && !outcome.status.is_success() {
        outcome.err_cell_num - 1
    } else {
        outcome.err_cell_num
    }
}

/// Build the produced record for one finished run.
pub fn build_report(nb_path: &str, run: &RepairRun) -> Result<NotebookReport> {
    let initial = run
        .history
        .first()
        .ok_or_else(|| Error::Notebook("run has no execution history".to_string()))?;

    let agg = aggregate_history(&run.history);

    // When name fixes netted nothing, the run's final state is the last
    // NameError rather than whatever came after it.
    let final_entry = match &agg.last_unresolved_name_error {
        Some(entry) => entry,
        None => run.history.last().unwrap_or(initial),
    };

    let initial_max = max_executed_cells(initial);
    let final_max = max_executed_cells(final_entry);

    let initial_pct = if initial.total_code_cells > 0 {
        initial_max as f64 / initial.total_code_cells as f64 * 100.0
    } else {
        0.0
    };
    let final_pct = if final_entry.total_code_cells > 0 {
        final_max as f64 / final_entry.total_code_cells as f64 * 100.0
    } else {
        0.0
    };

    Ok(NotebookReport {
        nb_path: nb_path.to_string(),
        initial_total_code_cells: initial.total_code_cells,
        initial_status: initial.status.label(),
        initial_max_executed_cells: initial_max,
        final_total_code_cells: final_entry.total_code_cells,
        final_status: final_entry.status.label(),
        final_max_executed_cells: final_max,
        increased_execution_cells: final_max - initial_max,
        increased_execution_percentage: final_pct - initial_pct,
        cells_gained_after_module_fix: agg.cells_gained_after_module_fix,
        cells_gained_after_file_fix: agg.cells_gained_after_file_fix,
        cells_gained_after_name_fix: agg.cells_gained_after_name_fix,
        module_not_found_count: agg.module_not_found_count,
        file_not_found_count: agg.file_not_found_count,
        name_error_count: agg.name_error_count,
        unique_statuses: agg.unique_statuses,
        installed_modules: run.installed_modules.iter().cloned().collect(),
        module_fix_llm_attempts: run.module_fix_llm_attempts,
        module_fix_llm_successes: run.module_fix_llm_successes,
        ast_status: run.ast_status,
        file_creation_error: run.err_in_file_creation.clone(),
    })
}
