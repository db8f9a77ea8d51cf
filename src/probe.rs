use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::CheckTable;
use crate::error::{HookError, Result};
use crate::report::ToolTag;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolchainKind {
    Python,
    Node,
    Dart,
    InfraCdk,
    Unknown,
}

impl ToolchainKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolchainKind::Python => "python",
            ToolchainKind::Node => "node",
            ToolchainKind::Dart => "dart",
            ToolchainKind::InfraCdk => "infra-cdk",
            ToolchainKind::Unknown => "unknown",
        }
    }

    pub fn from_str(s: &str) -> ToolchainKind {
        match s {
            "python" => ToolchainKind::Python,
            "node" => ToolchainKind::Node,
            "dart" => ToolchainKind::Dart,
            "infra-cdk" => ToolchainKind::InfraCdk,
            _ => ToolchainKind::Unknown,
        }
    }

    /// Marker files whose presence in a project root identifies this kind.
    fn markers(&self) -> &'static [&'static str] {
        match self {
            ToolchainKind::Python => &["pyproject.toml", "requirements.txt", "setup.py"],
            ToolchainKind::Node => &["package.json"],
            ToolchainKind::Dart => &["pubspec.yaml"],
            ToolchainKind::InfraCdk => &["cdk.json"],
            ToolchainKind::Unknown => &[],
        }
    }
}

/// Detection order is also report order.
const PROBED_KINDS: [ToolchainKind; 4] = [
    ToolchainKind::Python,
    ToolchainKind::Node,
    ToolchainKind::Dart,
    ToolchainKind::InfraCdk,
];

/// A project ecosystem found in the workspace, with the subset of its
/// check tags whose required binary is actually installed.
#[derive(Debug, Clone)]
pub struct DetectedToolchain {
    pub kind: ToolchainKind,
    pub root: PathBuf,
    pub available: BTreeSet<ToolTag>,
}

/// Inspect `path` and report every recognized toolchain.
///
/// A file path is resolved to the nearest ancestor directory holding any
/// marker; a directory is inspected as-is. "Nothing recognized" is an empty
/// vec, never an error — only an unreadable starting path fails.
pub fn detect(path: &Path, table: &CheckTable, verbose: u8) -> Result<Vec<DetectedToolchain>> {
    let meta = fs::metadata(path).map_err(|source| HookError::ProbeIo {
        path: path.to_path_buf(),
        source,
    })?;

    let root = if meta.is_file() {
        match nearest_project_root(path) {
            Some(dir) => dir,
            None => return Ok(Vec::new()),
        }
    } else {
        path.to_path_buf()
    };

    if verbose > 0 {
        eprintln!("probe: project root {}", root.display());
    }

    let mut detected = Vec::new();
    for kind in PROBED_KINDS {
        if !has_any_marker(&root, kind) {
            continue;
        }
        // One entry per kind even when several of its markers match.
        let mut available = BTreeSet::new();
        for spec in table.specs_for(kind) {
            if which::which(&spec.required_binary).is_ok() {
                available.insert(spec.tag);
            } else if verbose > 1 {
                eprintln!(
                    "probe: {} missing binary {}",
                    kind.as_str(),
                    spec.required_binary
                );
            }
        }
        // Zero available tools is still a detection: the aggregator must be
        // able to say "skipped" out loud instead of silently omitting it.
        detected.push(DetectedToolchain {
            kind,
            root: root.clone(),
            available,
        });
    }

    Ok(detected)
}

fn has_any_marker(dir: &Path, kind: ToolchainKind) -> bool {
    kind.markers().iter().any(|m| dir.join(m).exists())
}

fn nearest_project_root(file: &Path) -> Option<PathBuf> {
    let mut dir = file.parent()?;
    loop {
        if PROBED_KINDS.iter().any(|k| has_any_marker(dir, *k)) {
            return Some(dir.to_path_buf());
        }
        dir = dir.parent()?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn detect_in(dir: &Path) -> Vec<DetectedToolchain> {
        detect(dir, &CheckTable::builtin(), 0).unwrap()
    }

    #[test]
    fn empty_workspace_detects_nothing() {
        let tmp = TempDir::new().unwrap();
        assert!(detect_in(tmp.path()).is_empty());
    }

    #[test]
    fn unreadable_path_is_a_probe_error() {
        let tmp = TempDir::new().unwrap();
        let missing = tmp.path().join("gone");
        let err = detect(&missing, &CheckTable::builtin(), 0).unwrap_err();
        assert!(matches!(err, HookError::ProbeIo { .. }));
    }

    #[test]
    fn both_python_markers_yield_one_entry() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("pyproject.toml"), "[project]\n").unwrap();
        fs::write(tmp.path().join("requirements.txt"), "requests\n").unwrap();

        let found = detect_in(tmp.path());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind, ToolchainKind::Python);
    }

    #[test]
    fn cdk_and_node_markers_detect_both_kinds() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("package.json"), "{}\n").unwrap();
        fs::write(tmp.path().join("cdk.json"), "{}\n").unwrap();

        let kinds: Vec<ToolchainKind> = detect_in(tmp.path()).iter().map(|t| t.kind).collect();
        assert_eq!(kinds, vec![ToolchainKind::Node, ToolchainKind::InfraCdk]);
    }

    #[test]
    fn file_input_walks_up_to_project_root() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("pubspec.yaml"), "name: app\n").unwrap();
        let nested = tmp.path().join("lib").join("src");
        fs::create_dir_all(&nested).unwrap();
        let file = nested.join("main.dart");
        fs::write(&file, "void main() {}\n").unwrap();

        let found = detect(&file, &CheckTable::builtin(), 0).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind, ToolchainKind::Dart);
        assert_eq!(found[0].root, tmp.path());
    }

    #[test]
    fn file_with_no_project_root_detects_nothing() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("orphan.txt");
        fs::write(&file, "x\n").unwrap();
        // The tempdir ancestors (/tmp, /) carry no markers in practice, but
        // guard against a marker in an ancestor making this flaky.
        let found = detect(&file, &CheckTable::builtin(), 0).unwrap();
        for tc in &found {
            assert_ne!(tc.root, tmp.path());
        }
    }
}
