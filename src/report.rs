use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

use crate::probe::ToolchainKind;

/// One verification step (test, lint, ...) identified across toolchains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolTag {
    Test,
    Lint,
    Typecheck,
    Security,
    Audit,
}

impl ToolTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolTag::Test => "test",
            ToolTag::Lint => "lint",
            ToolTag::Typecheck => "typecheck",
            ToolTag::Security => "security",
            ToolTag::Audit => "audit",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CheckStatus {
    Passed,
    Failed,
    SkippedMissingTool,
    TimedOut,
    Error,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::Passed => "passed",
            CheckStatus::Failed => "failed",
            CheckStatus::SkippedMissingTool => "skipped-missing-tool",
            CheckStatus::TimedOut => "timed-out",
            CheckStatus::Error => "error",
        }
    }

    /// True for every status the aggregator counts as a real failure.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            CheckStatus::Failed | CheckStatus::TimedOut | CheckStatus::Error
        )
    }
}

/// Outcome of one executed (or skipped) CheckSpec. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResult {
    pub tag: ToolTag,
    pub status: CheckStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    pub stdout_tail: String,
    pub stderr_tail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverallStatus {
    Pass,
    Fail,
    SkippedAll,
}

/// Check results for one detected toolchain, in declared check order.
#[derive(Debug, Clone, Serialize)]
pub struct ToolchainResults {
    pub kind: ToolchainKind,
    pub checks: Vec<CheckResult>,
}

/// The single machine-readable verdict for one hook invocation.
/// Built once per attempt; the caller builds a fresh one per retry.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationReport {
    pub overall_status: OverallStatus,
    #[serde(serialize_with = "toolchains_as_map")]
    pub toolchains: Vec<ToolchainResults>,
    pub generated_at: String,
}

// Keyed by kind in detection order: {"python": [...], "node": [...]}
fn toolchains_as_map<S: Serializer>(
    toolchains: &[ToolchainResults],
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(toolchains.len()))?;
    for tc in toolchains {
        map.serialize_entry(tc.kind.as_str(), &tc.checks)?;
    }
    map.end()
}

/// Combine all per-toolchain results into one report.
///
/// A single failed/timed-out/errored check forces `fail` no matter how many
/// others passed. `skipped-all` covers both "every check skipped" and
/// "no toolchain detected" so a caller never mistakes an unverified tree
/// for a verified-clean one.
pub fn aggregate(toolchains: Vec<ToolchainResults>) -> VerificationReport {
    let all: Vec<&CheckResult> = toolchains.iter().flat_map(|t| t.checks.iter()).collect();

    let overall_status = if all.iter().any(|r| r.status.is_failure()) {
        OverallStatus::Fail
    } else if all
        .iter()
        .all(|r| r.status == CheckStatus::SkippedMissingTool)
    {
        // vacuously true when nothing was detected: nothing got verified
        OverallStatus::SkippedAll
    } else {
        OverallStatus::Pass
    };

    VerificationReport {
        overall_status,
        toolchains,
        generated_at: chrono::Utc::now().to_rfc3339(),
    }
}
