use std::fs;
use std::io::Write;
use std::path::Path;

use serde_json::{Map, Value};

use crate::error::{HookError, Result};

/// Read a settings document. A missing file is an empty object; present but
/// malformed bytes fail with ConfigParse — content is never repaired or
/// discarded.
pub fn load(path: &Path) -> Result<Map<String, Value>> {
    if !path.exists() {
        return Ok(Map::new());
    }
    let raw = fs::read_to_string(path)?;
    // Top-level must be an object; anything else is the same fatal parse
    // failure as broken syntax.
    serde_json::from_str::<Map<String, Value>>(&raw).map_err(|source| HookError::ConfigParse {
        path: path.to_path_buf(),
        source,
    })
}

/// Replace `key` wholesale with `subtree`, leaving every other top-level
/// key untouched. Full replace, not deep-merge: re-running installation is
/// idempotent and cannot accumulate stale entries from an older template.
pub fn merge(mut doc: Map<String, Value>, key: &str, subtree: Value) -> Map<String, Value> {
    doc.insert(key.to_string(), subtree);
    doc
}

/// Serialize to a temp file in the target's directory and rename over the
/// target, so a crash mid-write leaves either the old file or the new file,
/// never a truncated one.
pub fn write_atomic(path: &Path, doc: &Map<String, Value>) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => std::env::current_dir()?,
    };
    fs::create_dir_all(&parent)?;

    let mut tmp = tempfile::NamedTempFile::new_in(&parent)?;
    let json = serde_json::to_string_pretty(doc)?;
    tmp.write_all(json.as_bytes())?;
    tmp.write_all(b"\n")?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)
        .map_err(|e| HookError::Io(e.error))?;
    Ok(())
}
