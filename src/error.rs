//! Error types for wipman
//!
//! Exit codes:
//! - 0: Success
//! - 2: User error (bad args, not a wipman root, unknown ids)
//! - 3: Malformed file (a task or view file that cannot be parsed)
//! - 4: Operation failed (io, locking, watcher)
//! - 70: Invariant violated (in-memory state diverged from the rules the engine enforces)

use std::path::PathBuf;
use thiserror::Error;

/// Exit codes for the wipman CLI
pub mod exit_codes {
    pub const USER_ERROR: i32 = 2;
    pub const MALFORMED_FILE: i32 = 3;
    pub const OPERATION_FAILED: i32 = 4;
    pub const INVARIANT_VIOLATED: i32 = 70;
}

/// Main error type for wipman operations
#[derive(Error, Debug)]
pub enum Error {
    // User errors (exit code 2)
    #[error("Not a wipman directory: {0}")]
    NotAWipmanDir(PathBuf),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("View not found: {0}")]
    ViewNotFound(String),

    #[error("File is neither a task nor a view: {0}")]
    UnrecognizedFile(PathBuf),

    // Malformed files (exit code 3)
    #[error("Cannot parse {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    // Operation failures (exit code 4)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Watcher error: {0}")]
    Watch(#[from] notify::Error),

    #[error("Lock acquisition failed: {0}")]
    LockFailed(PathBuf),

    #[error("Invalid sync sequence: {reason}, path: {path}")]
    InvalidSyncSequence { path: PathBuf, reason: String },

    // Invariant violations (exit code 70)
    #[error("BUG - {0}")]
    Invariant(String),
}

impl Error {
    /// Build a parse error for the file at `path`.
    pub fn parse(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::Parse {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Build an invariant violation.
    pub fn invariant(message: impl Into<String>) -> Self {
        Error::Invariant(message.into())
    }

    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            // User errors
            Error::NotAWipmanDir(_)
            | Error::InvalidConfig(_)
            | Error::InvalidArgument(_)
            | Error::TaskNotFound(_)
            | Error::ViewNotFound(_)
            | Error::UnrecognizedFile(_) => exit_codes::USER_ERROR,

            // Malformed input
            Error::Parse { .. } => exit_codes::MALFORMED_FILE,

            // Operation failures
            Error::Io(_)
            | Error::Json(_)
            | Error::TomlParse(_)
            | Error::TomlSerialize(_)
            | Error::Watch(_)
            | Error::LockFailed(_)
            | Error::InvalidSyncSequence { .. } => exit_codes::OPERATION_FAILED,

            Error::Invariant(_) => exit_codes::INVARIANT_VIOLATED,
        }
    }

    /// Structured details for JSON output, when the variant carries any.
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Error::Parse { path, reason } => Some(serde_json::json!({
                "path": path,
                "reason": reason,
            })),
            Error::InvalidSyncSequence { path, reason } => Some(serde_json::json!({
                "path": path,
                "reason": reason,
            })),
            _ => None,
        }
    }
}

/// Result type alias for wipman operations
pub type Result<T> = std::result::Result<T, Error>;
