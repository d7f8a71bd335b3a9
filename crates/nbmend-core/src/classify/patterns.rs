//! Compiled patterns and field extractors for failure-text classification.

use std::sync::LazyLock;

use regex::Regex;

/// Substring identifying a missing-module failure.
pub const NO_MODULE_MARKER: &str = "No module named ";
/// Primary missing-file phrasing.
pub const NO_SUCH_FILE_MARKER: &str = "No such file or directory: ";
/// Alternate path-not-found signal (Spark).
pub const PATH_NOT_FOUND_MARKER: &str = "PATH_NOT_FOUND";
/// Disk exhaustion; unrecoverable for the whole run.
pub const DISK_FULL_MARKER: &str = "No space left on device";

/// ANSI remnant that survives in error-type tokens from colored tracebacks.
const ANSI_REMNANT: &str = "31m";

static ERROR_TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\w*Error\b").unwrap());

static CELL_MARKER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"In\[(\d+)\]").unwrap());

static CELL_MARKER_SPACED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"In \[(\d+)\]").unwrap());

static FNF_NOT_FOUND_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"FileNotFoundError: (.*?) not found\.").unwrap());

static FNF_FILE_NOT_EXIST_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"FileNotFoundError: File '(.*?)' does not exist").unwrap());

static FNF_DIR_NOT_EXIST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"FileNotFoundError: The directory '(.*?)' does not exist").unwrap()
});

static FNF_SPARK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"AnalysisException: \[PATH_NOT_FOUND\] Path does not exist: file:(\S+)").unwrap()
});

static NAME_QUOTED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"name '([^']+)'").unwrap());

/// First `…Error` identifier in the text, with terminal-formatting remnants
/// stripped. `None` when no such token exists.
pub fn error_token(text: &str) -> Option<String> {
    let token = ERROR_TOKEN_RE.find(text)?.as_str().to_string();
    if token.contains(ANSI_REMNANT) {
        Some(token.replace(ANSI_REMNANT, ""))
    } else {
        Some(token)
    }
}

/// Failing-cell index from the interpreter's own `In[n]` markers; 0 when
/// neither marker form appears.
pub fn cell_index(text: &str) -> i64 {
    marker_index(text).unwrap_or(0)
}

/// `In[n]` / `In [n]` lookup without the zero fallback, for reply parsing.
pub fn marker_index(text: &str) -> Option<i64> {
    for re in [&*CELL_MARKER_RE, &*CELL_MARKER_SPACED_RE] {
        if let Some(caps) = re.captures(text) {
            if let Ok(n) = caps[1].parse::<i64>() {
                return Some(n);
            }
        }
    }
    None
}

/// Missing module token: the text following the marker on its line, with
/// quotes and newlines trimmed.
pub fn missing_module(text: &str) -> Option<String> {
    let start = text.find(NO_MODULE_MARKER)? + NO_MODULE_MARKER.len();
    let rest = &text[start..];
    let token = rest.lines().next().unwrap_or(rest);
    let token = token.replace(['\'', '"'], "").trim().to_string();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

/// Missing path, tried against the known phrasings in priority order.
pub fn missing_path(text: &str) -> Option<String> {
    if let Some(start) = text.find(NO_SUCH_FILE_MARKER) {
        let rest = &text[start + NO_SUCH_FILE_MARKER.len()..];
        let path = rest.lines().next().unwrap_or(rest);
        let path = path.replace(['\'', '"'], "").trim().to_string();
        if !path.is_empty() {
            return Some(path);
        }
    }
    for re in [
        &*FNF_NOT_FOUND_RE,
        &*FNF_FILE_NOT_EXIST_RE,
        &*FNF_DIR_NOT_EXIST_RE,
        &*FNF_SPARK_RE,
    ] {
        if let Some(caps) = re.captures(text) {
            return Some(caps[1].to_string());
        }
    }
    None
}

/// Undefined identifier from the `name '<ident>'` quoted form.
pub fn undefined_name(text: &str) -> Option<String> {
    NAME_QUOTED_RE
        .captures(text)
        .map(|caps| caps[1].to_string())
}
