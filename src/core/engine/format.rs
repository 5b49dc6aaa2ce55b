//! Human-facing rendering of step output and failure classification.

use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;

pub const CREATED_GLYPH: &str = "✅";
pub const CONFIGURED_GLYPH: &str = "🔄";
pub const UNCHANGED_GLYPH: &str = "➖";
pub const FAILED_GLYPH: &str = "❌";
pub const WARNING_MARKER: &str = "⚠️ Warnings:";

/// First matching substring decides the glyph for a stdout line.
const LINE_RULES: &[(&str, &str)] = &[
    ("created", CREATED_GLYPH),
    ("configured", CONFIGURED_GLYPH),
    ("unchanged", UNCHANGED_GLYPH),
];

/// Prefix recognized stdout lines with status glyphs and append any stderr
/// under the warning marker. Stderr text is informational only.
pub fn format_output(stdout: &str, stderr: &str) -> String {
    let mut lines: Vec<String> = stdout
        .lines()
        .map(|line| {
            LINE_RULES
                .iter()
                .find(|(needle, _)| line.contains(needle))
                .map(|(_, glyph)| format!("{} {}", glyph, line))
                .unwrap_or_else(|| line.to_string())
        })
        .collect();

    let stderr = stderr.trim();
    if !stderr.is_empty() {
        lines.push(WARNING_MARKER.to_string());
        lines.extend(stderr.lines().map(str::to_string));
    }

    lines.join("\n")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    CommandTimeout,
    ResourceMissing,
    PermissionDenied,
    GenericExecutionFailure,
}

impl FailureKind {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            FailureKind::CommandTimeout => ErrorCode::CommandTimeout,
            FailureKind::ResourceMissing => ErrorCode::ResourceMissing,
            FailureKind::PermissionDenied => ErrorCode::PermissionDenied,
            FailureKind::GenericExecutionFailure => ErrorCode::GenericExecutionFailure,
        }
    }

    fn headline(&self) -> &'static str {
        match self {
            FailureKind::CommandTimeout => "Command timed out",
            FailureKind::ResourceMissing => "Resource not found",
            FailureKind::PermissionDenied => "Permission denied",
            FailureKind::GenericExecutionFailure => "Command failed",
        }
    }
}

/// Classify a process failure by its error text.
pub fn classify_failure(raw: &str) -> FailureKind {
    let lowered = raw.to_lowercase();
    if lowered.contains("not found") {
        FailureKind::ResourceMissing
    } else if lowered.contains("permission denied") {
        FailureKind::PermissionDenied
    } else {
        FailureKind::GenericExecutionFailure
    }
}

/// A classified step failure. `raw` keeps the original error text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepFailure {
    pub kind: FailureKind,
    pub message: String,
    pub raw: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

impl StepFailure {
    pub fn new(kind: FailureKind, raw: impl Into<String>, exit_code: Option<i32>) -> Self {
        let raw = raw.into();
        let first_line = raw.lines().find(|l| !l.trim().is_empty()).unwrap_or("").trim();
        let message = if first_line.is_empty() {
            kind.headline().to_string()
        } else {
            format!("{}: {}", kind.headline(), first_line)
        };
        Self {
            kind,
            message,
            raw,
            exit_code,
        }
    }

    pub fn classified(raw: impl Into<String>, exit_code: Option<i32>) -> Self {
        let raw = raw.into();
        Self::new(classify_failure(&raw), raw, exit_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glyphs_prefix_recognized_lines() {
        let stdout = "configmap/app-config created\ndeployment.apps/web configured\nsecret/db unchanged\nWarning: something\n";
        let formatted = format_output(stdout, "");

        assert_eq!(
            formatted,
            "✅ configmap/app-config created\n🔄 deployment.apps/web configured\n➖ secret/db unchanged\nWarning: something"
        );
    }

    #[test]
    fn stderr_goes_under_warning_marker() {
        let formatted = format_output("namespace/team-a created\n", "W0101 deprecated API\n");
        assert_eq!(
            formatted,
            "✅ namespace/team-a created\n⚠️ Warnings:\nW0101 deprecated API"
        );
    }

    #[test]
    fn classification_by_substring() {
        assert_eq!(
            classify_failure("Error from server (NotFound): namespaces \"x\" not found"),
            FailureKind::ResourceMissing
        );
        assert_eq!(
            classify_failure("open /root/.kube/config: Permission Denied"),
            FailureKind::PermissionDenied
        );
        assert_eq!(
            classify_failure("error: unable to recognize"),
            FailureKind::GenericExecutionFailure
        );
    }

    #[test]
    fn failure_message_reflects_category_and_keeps_raw() {
        let failure = StepFailure::classified("\nError: secrets \"db\" not found\nmore", Some(1));
        assert_eq!(failure.kind, FailureKind::ResourceMissing);
        assert_eq!(failure.message, "Resource not found: Error: secrets \"db\" not found");
        assert_eq!(failure.raw, "\nError: secrets \"db\" not found\nmore");
        assert_eq!(failure.exit_code, Some(1));
    }

    #[test]
    fn empty_raw_still_has_message() {
        let failure = StepFailure::classified("", Some(2));
        assert_eq!(failure.message, "Command failed");
    }
}
