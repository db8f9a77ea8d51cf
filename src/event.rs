use std::io::Read;
use std::path::PathBuf;

use serde_json::Value;

use crate::error::{HookError, Result};

/// Resolve the changed-file path for a post-edit invocation.
///
/// An explicit argument wins. Otherwise stdin carries the host's hook event:
/// either a JSON payload (file path under `tool_input.file_path`, with a
/// top-level `file_path` fallback) or a bare path line.
pub fn resolve_target(arg: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = arg {
        return Ok(path);
    }

    let mut raw = String::new();
    std::io::stdin().read_to_string(&mut raw)?;
    target_from_stdin(&raw)
}

fn target_from_stdin(raw: &str) -> Result<PathBuf> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(HookError::NoTarget(
            "no path argument and empty stdin".into(),
        ));
    }

    if let Ok(payload) = serde_json::from_str::<Value>(raw) {
        return payload_file_path(&payload).ok_or_else(|| {
            HookError::NoTarget("event payload has no tool_input.file_path".into())
        });
    }

    // Not JSON: accept a bare path line.
    Ok(PathBuf::from(raw))
}

fn payload_file_path(payload: &Value) -> Option<PathBuf> {
    payload
        .get("tool_input")
        .and_then(|t| t.get("file_path"))
        .or_else(|| payload.get("file_path"))
        .and_then(|p| p.as_str())
        .map(PathBuf::from)
}
