use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::HookError;
use crate::settings;

/// The one top-level settings key this tool owns exclusively.
pub const HOOKS_KEY: &str = "hooks";

/// Placeholder a template uses wherever the installed binary path belongs.
const BIN_PLACEHOLDER: &str = "$VERIHOOK_BIN";

const TEMPLATE_FILE: &str = "hooks.json";

/// Install (or uninstall) the post-edit hook subtree in a settings file.
pub fn run(
    settings_path: &Path,
    templates_dir: Option<&Path>,
    uninstall: bool,
    status_only: bool,
    verbose: u8,
) -> Result<()> {
    if status_only {
        let doc = settings::load(settings_path)?;
        println!(
            "hooks status={} path={}",
            if doc.contains_key(HOOKS_KEY) {
                "installed"
            } else {
                "not_installed"
            },
            settings_path.display()
        );
        return Ok(());
    }

    if uninstall {
        let mut doc = settings::load(settings_path)?;
        if doc.remove(HOOKS_KEY).is_none() {
            println!("hooks uninstall: nothing to remove");
            return Ok(());
        }
        backup(settings_path);
        settings::write_atomic(settings_path, &doc)?;
        println!("hooks uninstall ok path={}", settings_path.display());
        return Ok(());
    }

    let template = load_template(templates_dir)?;
    let bin = current_bin()?;
    let subtree = resolve_placeholders(template, &bin.to_string_lossy());

    // Parse failure of an existing file aborts here, before any write.
    let doc = settings::load(settings_path)?;
    let already = doc.contains_key(HOOKS_KEY);
    let merged = settings::merge(doc, HOOKS_KEY, subtree);

    backup(settings_path);
    settings::write_atomic(settings_path, &merged)?;

    println!(
        "hooks {} path={}",
        if already { "updated ok" } else { "installed ok" },
        settings_path.display()
    );
    if verbose > 0 {
        eprintln!("  command: {}", bin.display());
        eprintln!("  fires on: post-edit (Edit|Write|MultiEdit)");
    }
    Ok(())
}

/// The built-in hooks subtree: run `verihook check` after every edit, with
/// the changed file delivered on stdin by the host.
fn default_template() -> Value {
    json!({
        "PostToolUse": [
            {
                "matcher": "Edit|Write|MultiEdit",
                "hooks": [
                    {
                        "type": "command",
                        "command": format!("{} check --json-only", BIN_PLACEHOLDER),
                        "timeout": 600
                    }
                ]
            }
        ]
    })
}

fn load_template(templates_dir: Option<&Path>) -> crate::error::Result<Value> {
    let Some(dir) = templates_dir else {
        return Ok(default_template());
    };
    let path = dir.join(TEMPLATE_FILE);
    let raw = fs::read_to_string(&path).map_err(|e| {
        HookError::Template(format!("cannot read {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&raw).map_err(|e| {
        HookError::Template(format!("{} is not valid JSON: {}", path.display(), e))
    })
}

/// Substitute the binary placeholder everywhere in the parsed template.
/// A typed walk over the value tree — templates never go through string
/// concatenation, so paths cannot break JSON escaping.
fn resolve_placeholders(value: Value, bin: &str) -> Value {
    match value {
        Value::String(s) => Value::String(s.replace(BIN_PLACEHOLDER, bin)),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|v| resolve_placeholders(v, bin))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, resolve_placeholders(v, bin)))
                .collect(),
        ),
        other => other,
    }
}

fn current_bin() -> Result<PathBuf> {
    let exe = std::env::current_exe().context("cannot resolve current executable")?;
    Ok(exe.canonicalize().unwrap_or(exe))
}

// Best-effort sidecar copy of the previous settings; the atomic write is
// the real safety net.
fn backup(path: &Path) {
    if path.exists() {
        let bak = path.with_extension("json.bak");
        if let Err(e) = fs::copy(path, &bak) {
            eprintln!("hooks WARNING: failed to back up {}: {}", bak.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_template_carries_the_placeholder() {
        let raw = serde_json::to_string(&default_template()).unwrap();
        assert!(raw.contains(BIN_PLACEHOLDER));
    }

    #[test]
    fn placeholder_resolution_reaches_nested_strings() {
        let resolved =
            resolve_placeholders(default_template(), "/opt/verihook");
        let cmd = &resolved["PostToolUse"][0]["hooks"][0]["command"];
        assert_eq!(cmd, &json!("/opt/verihook check --json-only"));
    }

    #[test]
    fn placeholder_resolution_leaves_other_values_alone() {
        let template = json!({
            "n": 600,
            "flag": true,
            "cmd": "$VERIHOOK_BIN check",
            "plain": "no placeholder here"
        });
        let resolved = resolve_placeholders(template, "/usr/bin/vh");
        assert_eq!(resolved["n"], json!(600));
        assert_eq!(resolved["flag"], json!(true));
        assert_eq!(resolved["cmd"], json!("/usr/bin/vh check"));
        assert_eq!(resolved["plain"], json!("no placeholder here"));
    }

    #[test]
    fn missing_template_file_is_an_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        assert!(load_template(Some(tmp.path())).is_err());
    }

    #[test]
    fn template_dir_overrides_the_default() {
        let tmp = tempfile::TempDir::new().unwrap();
        fs::write(
            tmp.path().join(TEMPLATE_FILE),
            r#"{"PostToolUse": [], "custom": "$VERIHOOK_BIN"}"#,
        )
        .unwrap();
        let template = load_template(Some(tmp.path())).unwrap();
        assert_eq!(template["custom"], json!("$VERIHOOK_BIN"));
    }
}
