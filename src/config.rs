use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::probe::ToolchainKind;
use crate::report::ToolTag;

const DEFAULT_TEST_TIMEOUT: u64 = 120;
const DEFAULT_LINT_TIMEOUT: u64 = 30;
const DEFAULT_TIMEOUT: u64 = 60;

/// One configured verification command. Immutable at run time; the argv is
/// data, not contract — hosts can swap it via the override file.
#[derive(Debug, Clone)]
pub struct CheckSpec {
    pub tag: ToolTag,
    pub argv: Vec<String>,
    pub required_binary: String,
    pub timeout: Duration,
}

/// The per-toolchain check tables the whole invocation runs from.
#[derive(Debug, Clone)]
pub struct CheckTable {
    by_kind: BTreeMap<ToolchainKind, Vec<CheckSpec>>,
}

/// On-disk shape of an override entry in config.toml.
#[derive(Debug, Deserialize)]
struct RawSpec {
    tag: String,
    argv: Vec<String>,
    required_binary: String,
    timeout_secs: Option<u64>,
}

impl CheckTable {
    /// Built-in defaults plus an optional user override file. An override
    /// replaces the named kind's table wholesale, same clean-deploy rule as
    /// the settings hooks key. A malformed override is an error, never
    /// silently ignored.
    pub fn load(verbose: u8) -> Result<Self> {
        let mut table = Self::builtin();
        let Some(path) = override_path() else {
            return Ok(table);
        };
        if !path.exists() {
            return Ok(table);
        }
        if verbose > 0 {
            eprintln!("config: override {}", path.display());
        }

        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let parsed: BTreeMap<String, Vec<RawSpec>> = toml::from_str(&raw)
            .with_context(|| format!("invalid check table in {}", path.display()))?;

        for (kind_name, specs) in parsed {
            let kind = ToolchainKind::from_str(&kind_name);
            if kind == ToolchainKind::Unknown {
                anyhow::bail!("unknown toolchain '{}' in {}", kind_name, path.display());
            }
            let specs = specs
                .into_iter()
                .map(|raw| raw.into_spec())
                .collect::<Result<Vec<_>>>()
                .with_context(|| format!("invalid spec for '{}'", kind_name))?;
            table.by_kind.insert(kind, specs);
        }
        Ok(table)
    }

    pub fn builtin() -> Self {
        let mut by_kind = BTreeMap::new();
        by_kind.insert(
            ToolchainKind::Python,
            vec![
                spec(ToolTag::Test, &["pytest", "-q"], "pytest", DEFAULT_TEST_TIMEOUT),
                spec(ToolTag::Lint, &["ruff", "check", "."], "ruff", DEFAULT_LINT_TIMEOUT),
                spec(
                    ToolTag::Typecheck,
                    &["mypy", "--no-error-summary", "."],
                    "mypy",
                    DEFAULT_TIMEOUT,
                ),
                spec(ToolTag::Security, &["bandit", "-q", "-r", "."], "bandit", DEFAULT_TIMEOUT),
                spec(
                    ToolTag::Audit,
                    &["pip-audit", "--progress-spinner", "off"],
                    "pip-audit",
                    DEFAULT_TIMEOUT,
                ),
            ],
        );
        by_kind.insert(
            ToolchainKind::Node,
            vec![
                spec(ToolTag::Test, &["npm", "test", "--silent"], "npm", DEFAULT_TEST_TIMEOUT),
                spec(
                    ToolTag::Lint,
                    &["npx", "--no-install", "eslint", "."],
                    "npx",
                    DEFAULT_LINT_TIMEOUT,
                ),
                spec(
                    ToolTag::Typecheck,
                    &["npx", "--no-install", "tsc", "--noEmit"],
                    "npx",
                    DEFAULT_TIMEOUT,
                ),
                spec(
                    ToolTag::Audit,
                    &["npm", "audit", "--audit-level=high"],
                    "npm",
                    DEFAULT_TIMEOUT,
                ),
            ],
        );
        by_kind.insert(
            ToolchainKind::Dart,
            vec![
                spec(ToolTag::Test, &["flutter", "test"], "flutter", DEFAULT_TEST_TIMEOUT),
                spec(ToolTag::Lint, &["dart", "analyze"], "dart", DEFAULT_LINT_TIMEOUT),
            ],
        );
        by_kind.insert(
            ToolchainKind::InfraCdk,
            vec![
                spec(
                    ToolTag::Typecheck,
                    &["npx", "--no-install", "cdk", "synth", "--quiet"],
                    "npx",
                    DEFAULT_TIMEOUT,
                ),
                spec(
                    ToolTag::Audit,
                    &["npm", "audit", "--audit-level=high"],
                    "npm",
                    DEFAULT_TIMEOUT,
                ),
            ],
        );
        CheckTable { by_kind }
    }

    pub fn specs_for(&self, kind: ToolchainKind) -> &[CheckSpec] {
        self.by_kind.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }
}

impl RawSpec {
    fn into_spec(self) -> Result<CheckSpec> {
        let tag = match self.tag.as_str() {
            "test" => ToolTag::Test,
            "lint" => ToolTag::Lint,
            "typecheck" => ToolTag::Typecheck,
            "security" => ToolTag::Security,
            "audit" => ToolTag::Audit,
            other => anyhow::bail!("unknown check tag '{}'", other),
        };
        if self.argv.is_empty() {
            anyhow::bail!("check '{}' has an empty argv", self.tag);
        }
        let secs = self.timeout_secs.unwrap_or(match tag {
            ToolTag::Test => DEFAULT_TEST_TIMEOUT,
            ToolTag::Lint => DEFAULT_LINT_TIMEOUT,
            _ => DEFAULT_TIMEOUT,
        });
        Ok(CheckSpec {
            tag,
            argv: self.argv,
            required_binary: self.required_binary,
            timeout: Duration::from_secs(secs),
        })
    }
}

fn spec(tag: ToolTag, argv: &[&str], required_binary: &str, timeout_secs: u64) -> CheckSpec {
    CheckSpec {
        tag,
        argv: argv.iter().map(|s| s.to_string()).collect(),
        required_binary: required_binary.to_string(),
        timeout: Duration::from_secs(timeout_secs),
    }
}

fn override_path() -> Option<PathBuf> {
    if let Ok(explicit) = std::env::var("VERIHOOK_CONFIG") {
        return Some(PathBuf::from(explicit));
    }
    dirs::config_dir().map(|d| d.join("verihook").join("config.toml"))
}
