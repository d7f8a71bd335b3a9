//! Shared typed models used across execution, classification, repair, and
//! reporting layers.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Execution outcome taxonomy
// ---------------------------------------------------------------------------

/// Classified result of one notebook execution attempt.
///
/// Kind-specific extracted fields travel inside their variant so a status can
/// never be separated from the data its repair strategy needs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// Every code cell ran to completion.
    Success,
    /// The execution collaborator hit its wall-clock timeout.
    Timeout,
    /// A `No module named …` failure; payload is the raw missing module text.
    ModuleNotFound { missing_module: String },
    /// A missing file or directory; payload is the extracted path.
    FileNotFound { missing_path: String },
    /// An undefined variable; payload is the identifier.
    NameError { undefined_name: String },
    /// No error-type token matched; the tag was assigned by the
    /// generative-text collaborator.
    Unclassified { tag: String },
    /// Any other recognised `…Error` token, passed through as-is.
    Other { error_type: String },
}

impl ExecutionStatus {
    /// Stable label used in cached records and CSV export.
    pub fn label(&self) -> String {
        match self {
            ExecutionStatus::Success => "Success".to_string(),
            ExecutionStatus::Timeout => "TimeoutError".to_string(),
            ExecutionStatus::ModuleNotFound { .. } => "ModuleNotFoundError".to_string(),
            ExecutionStatus::FileNotFound { .. } => "FileNotFoundError".to_string(),
            ExecutionStatus::NameError { .. } => "NameError".to_string(),
            ExecutionStatus::Unclassified { tag } => format!("UnclassifiedError={tag}"),
            ExecutionStatus::Other { error_type } => error_type.clone(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionStatus::Success)
    }
}

/// How the scope resolver explained one NameError.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NameResolution {
    /// No accessible definition exists anywhere in the notebook.
    Undefined,
    /// An accessible global definition exists in a later cell.
    DefinedAfter,
}

/// Result of one execution attempt.
///
/// `err_cell_num` is the 1-based logical index of the last cell reached, the
/// total code-cell count on success, or -1 on timeout.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub status: ExecutionStatus,
    pub total_code_cells: i64,
    pub err_cell_num: i64,
    /// Attached by the controller once the resolver has run for a NameError.
    pub name_resolution: Option<NameResolution>,
}

impl ExecutionOutcome {
    pub fn new(status: ExecutionStatus, total_code_cells: i64, err_cell_num: i64) -> Self {
        Self {
            status,
            total_code_cells,
            err_cell_num,
            name_resolution: None,
        }
    }

    pub fn success(total_code_cells: i64) -> Self {
        Self::new(ExecutionStatus::Success, total_code_cells, total_code_cells)
    }

    pub fn timeout(total_code_cells: i64) -> Self {
        Self::new(ExecutionStatus::Timeout, total_code_cells, -1)
    }
}

// ---------------------------------------------------------------------------
// Repair records
// ---------------------------------------------------------------------------

/// Which repair strategy a loop iteration applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrategyKind {
    InstallModule,
    SynthesizeFile,
    InsertDefinition,
    ReorderCells,
}

/// Artifact produced by a repair strategy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum RepairArtifact {
    InstalledModule(String),
    CreatedPath(String),
    NewNotebook(String),
    None,
}

/// One entry per repair-loop iteration: the outcome that triggered it, the
/// strategy chosen, and what the strategy produced.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RepairRecord {
    pub trigger: ExecutionOutcome,
    pub strategy: StrategyKind,
    pub artifact: RepairArtifact,
}

// ---------------------------------------------------------------------------
// Run-level summary tags
// ---------------------------------------------------------------------------

/// Summary over the NameError resolution paths a run exercised.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AstStatus {
    NoUndefined,
    Undefined,
    DefinedAfter,
    Both,
}

impl AstStatus {
    /// Fold the sequence of per-repair resolutions into the summary tag.
    pub fn from_resolutions(resolutions: &[NameResolution]) -> Self {
        let saw_undefined = resolutions.contains(&NameResolution::Undefined);
        let saw_defined_after = resolutions.contains(&NameResolution::DefinedAfter);
        match (saw_undefined, saw_defined_after) {
            (false, false) => AstStatus::NoUndefined,
            (true, true) => AstStatus::Both,
            (true, false) => AstStatus::Undefined,
            (false, true) => AstStatus::DefinedAfter,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            AstStatus::NoUndefined => "no_undefined",
            AstStatus::Undefined => "undefined",
            AstStatus::DefinedAfter => "defined_after",
            AstStatus::Both => "both",
        }
    }
}
