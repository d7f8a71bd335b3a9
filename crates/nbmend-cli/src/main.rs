//! nbmend command-line interface.
//!
//! Three subcommands: `run` repairs a single notebook, `sweep` walks a
//! directory tree and repairs every notebook it finds (optionally in
//! parallel, with cache-based resume), and `export` dumps cached reports to
//! CSV.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

use nbmend_core::exec::{PapermillExecutor, DEFAULT_EXECUTION_TIMEOUT_SECS};
use nbmend_core::llm::{
    OllamaCompleter, DEFAULT_COMPLETION_TIMEOUT_SECS, DEFAULT_MODEL, DEFAULT_OLLAMA_HOST,
};
use nbmend_core::notebook::{read_checked, ReadStatus};
use nbmend_core::pkg::PipInstaller;
use nbmend_core::repair::RepairLoop;
use nbmend_core::report::{build_report, NotebookReport};
use nbmend_core::store::{ErrorRecord, ResultStore};

#[derive(Parser)]
#[command(
    name = "nbmend",
    version,
    about = "Analyze and repair notebooks that fail to execute"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Clone)]
struct CollaboratorArgs {
    /// Ollama server for the generative-text collaborator.
    #[arg(long, default_value = DEFAULT_OLLAMA_HOST)]
    ollama_host: String,

    /// Model name passed to the Ollama server.
    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,

    /// Wall-clock budget for one notebook execution, in seconds.
    #[arg(long, default_value_t = DEFAULT_EXECUTION_TIMEOUT_SECS)]
    execution_timeout: u64,

    /// Python interpreter used to run papermill.
    #[arg(long, default_value = "python3")]
    python: String,

    /// pip executable used to install missing modules.
    #[arg(long, default_value = "pip")]
    pip: String,
}

#[derive(Args, Clone)]
struct CacheArgs {
    /// Result/error cache database.
    #[arg(long, default_value = "nbmend-cache.db")]
    cache: PathBuf,

    /// Skip notebooks already present in the cache.
    #[arg(long)]
    resume: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Repair one notebook and print its report.
    Run {
        notebook: PathBuf,
        #[command(flatten)]
        collab: CollaboratorArgs,
        #[command(flatten)]
        cache: CacheArgs,
    },
    /// Walk a directory tree and repair every notebook in it.
    Sweep {
        root: PathBuf,
        /// Worker threads; notebooks are independent, so they parallelize.
        #[arg(long, default_value_t = 1)]
        jobs: usize,
        #[command(flatten)]
        collab: CollaboratorArgs,
        #[command(flatten)]
        cache: CacheArgs,
    },
    /// Export cached reports to CSV.
    Export {
        #[arg(long, default_value = "nbmend-cache.db")]
        cache: PathBuf,
        /// Output CSV path.
        #[arg(long)]
        out: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("NBMEND_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            notebook,
            collab,
            cache,
        } => {
            let store = ResultStore::open(&cache.cache)?;
            match process_notebook(&notebook, &collab, &store, cache.resume)? {
                Some(report) => println!("{}", serde_json::to_string_pretty(&report)?),
                None => info!(notebook = %notebook.display(), "nothing to do"),
            }
            Ok(())
        }
        Command::Sweep {
            root,
            jobs,
            collab,
            cache,
        } => sweep(&root, jobs, &collab, &cache),
        Command::Export { cache, out } => export_csv(&cache, &out),
    }
}

/// Run the full pipeline for one notebook: cache check, document gate,
/// repair loop, report, cache write.
///
/// Returns `None` when the notebook was skipped (cached) or rejected by the
/// gate. Only disk exhaustion propagates as `Err`; per-notebook failures are
/// recorded in the error cache so a sweep keeps going.
fn process_notebook(
    nb_path: &Path,
    collab: &CollaboratorArgs,
    store: &ResultStore,
    resume: bool,
) -> Result<Option<NotebookReport>> {
    let full_path = nb_path.display().to_string();
    let nb_name = nb_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| full_path.clone());

    if resume && (store.contains_result(&nb_name)? || store.contains_error(&full_path)?) {
        info!(notebook = %full_path, "already evaluated, skipping");
        return Ok(None);
    }

    let (_, status) = read_checked(nb_path);
    if status != ReadStatus::Ok {
        warn!(notebook = %full_path, status = status.label(), "rejected by document gate");
        store.set_error(
            &full_path,
            &ErrorRecord {
                nb_path: full_path.clone(),
                status: status.label().to_string(),
            },
        )?;
        return Ok(None);
    }

    let executor = PapermillExecutor {
        python: collab.python.clone(),
        kernel: "python3".to_string(),
        output_target: None,
    };
    let completer = OllamaCompleter::new(
        &collab.ollama_host,
        &collab.model,
        Duration::from_secs(DEFAULT_COMPLETION_TIMEOUT_SECS),
    )?;
    let installer = PipInstaller {
        pip: collab.pip.clone(),
    };

    info!(notebook = %full_path, "starting repair loop");
    let run = RepairLoop::new(&executor, &completer, &installer)
        .with_timeout(Duration::from_secs(collab.execution_timeout))
        .run(nb_path);

    match run {
        Ok(run) => {
            let report = build_report(&full_path, &run)?;
            store.set_result(&nb_name, &report)?;
            info!(
                notebook = %full_path,
                initial_cells = report.initial_max_executed_cells,
                final_cells = report.final_max_executed_cells,
                "repair loop finished"
            );
            Ok(Some(report))
        }
        Err(e) if matches!(e, nbmend_core::Error::DiskFull(_)) => {
            Err(e).context("disk exhausted, aborting")
        }
        Err(e) => {
            warn!(notebook = %full_path, error = %e, "repair loop failed");
            store.set_error(
                &full_path,
                &ErrorRecord {
                    nb_path: full_path.clone(),
                    status: e.to_string(),
                },
            )?;
            Ok(None)
        }
    }
}

/// Notebooks under `root`, checkpoint copies excluded.
fn collect_notebooks(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension().map(|e| e == "ipynb").unwrap_or(false)
                && !path
                    .components()
                    .any(|c| c.as_os_str() == ".ipynb_checkpoints")
        })
        .collect()
}

fn sweep(root: &Path, jobs: usize, collab: &CollaboratorArgs, cache: &CacheArgs) -> Result<()> {
    let store = ResultStore::open(&cache.cache)?;
    let notebooks = collect_notebooks(root);
    info!(total = notebooks.len(), root = %root.display(), "sweep starting");
    if notebooks.is_empty() {
        return Ok(());
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(jobs.max(1))
        .build();

    let outcomes: Vec<Result<Option<NotebookReport>>> = match pool {
        Ok(pool) => pool.install(|| {
            use rayon::prelude::*;
            notebooks
                .par_iter()
                .map(|nb| process_notebook(nb, collab, &store, cache.resume))
                .collect()
        }),
        Err(_) => notebooks
            .iter()
            .map(|nb| process_notebook(nb, collab, &store, cache.resume))
            .collect(),
    };

    let mut repaired = 0usize;
    let mut skipped = 0usize;
    for outcome in outcomes {
        match outcome {
            Ok(Some(_)) => repaired += 1,
            Ok(None) => skipped += 1,
            Err(e) => return Err(e),
        }
    }
    info!(repaired, skipped, "sweep finished");
    Ok(())
}

const CSV_COLUMNS: &[&str] = &[
    "key",
    "nb_path",
    "initial_total_code_cells",
    "initial_status",
    "initial_max_executed_cells",
    "final_total_code_cells",
    "final_status",
    "final_max_executed_cells",
    "increased_execution_cells",
    "increased_execution_percentage",
    "cells_gained_after_module_fix",
    "cells_gained_after_file_fix",
    "cells_gained_after_name_fix",
    "module_not_found_count",
    "file_not_found_count",
    "name_error_count",
    "unique_statuses",
    "installed_modules",
    "module_fix_llm_attempts",
    "module_fix_llm_successes",
    "ast_status",
    "file_creation_error",
];

fn export_csv(cache: &Path, out: &Path) -> Result<()> {
    let store = ResultStore::open(cache)?;
    let results = store.all_results()?;

    let mut writer = csv::Writer::from_path(out)
        .with_context(|| format!("cannot write {}", out.display()))?;
    writer.write_record(CSV_COLUMNS)?;
    for (key, report) in &results {
        writer.write_record([
            key.as_str(),
            report.nb_path.as_str(),
            &report.initial_total_code_cells.to_string(),
            report.initial_status.as_str(),
            &report.initial_max_executed_cells.to_string(),
            &report.final_total_code_cells.to_string(),
            report.final_status.as_str(),
            &report.final_max_executed_cells.to_string(),
            &report.increased_execution_cells.to_string(),
            &report.increased_execution_percentage.to_string(),
            &report.cells_gained_after_module_fix.to_string(),
            &report.cells_gained_after_file_fix.to_string(),
            &report.cells_gained_after_name_fix.to_string(),
            &report.module_not_found_count.to_string(),
            &report.file_not_found_count.to_string(),
            &report.name_error_count.to_string(),
            &report.unique_statuses.join(";"),
            &report.installed_modules.join(";"),
            &report.module_fix_llm_attempts.to_string(),
            &report.module_fix_llm_successes.to_string(),
            report.ast_status.label(),
            report.file_creation_error.as_deref().unwrap_or(""),
        ])?;
    }
    writer.flush()?;
    info!(rows = results.len(), out = %out.display(), "export finished");
    Ok(())
}
