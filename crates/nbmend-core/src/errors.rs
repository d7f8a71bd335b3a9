//! Error types for the nbmend core library.

/// Top-level error enum for the nbmend core library.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Notebook error: {0}")]
    Notebook(String),

    #[error("Parse error: {0}")]
    Parse(String),

    /// The classifier's own dispatch indicated a failure kind but the
    /// mandatory field could not be extracted from the message.
    #[error("Classifier contract violation: {0}")]
    Contract(String),

    /// Disk exhaustion reported by the interpreter; unrecoverable.
    #[error("No space left on device: {0}")]
    DiskFull(String),

    #[error("Completion error: {0}")]
    Completion(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether this error must abort the whole run instead of ending one
    /// repair loop gracefully.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::DiskFull(_) | Error::Contract(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
