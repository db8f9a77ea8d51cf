use std::path::PathBuf;
use thiserror::Error;

/// Errors that abort an invocation. Per-check problems (missing tool,
/// timeout, spawn failure) are statuses on a CheckResult, never errors.
#[derive(Debug, Error)]
pub enum HookError {
    #[error("cannot read workspace path {path}: {source}")]
    ProbeIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("settings file {path} is not valid JSON: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("hooks template: {0}")]
    Template(String),

    #[error("no target path: {0}")]
    NoTarget(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, HookError>;
