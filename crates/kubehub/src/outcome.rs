use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::CommandOutput;

static ALREADY_EXISTS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(already\s+exists|\(AlreadyExists\))").expect("static regex"));

/// Result of an idempotent create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum ApplyOutcome {
    Created,
    AlreadyExists,
    Failed(String),
}

impl ApplyOutcome {
    pub fn classify(out: &CommandOutput) -> Self {
        if out.success() {
            return ApplyOutcome::Created;
        }
        if ALREADY_EXISTS.is_match(&out.stderr) || ALREADY_EXISTS.is_match(&out.stdout) {
            return ApplyOutcome::AlreadyExists;
        }
        let reason = out.stderr.trim();
        if reason.is_empty() {
            ApplyOutcome::Failed(format!("exit status {}", out.status))
        } else {
            ApplyOutcome::Failed(reason.to_string())
        }
    }

    /// Created and AlreadyExists both leave the resource present.
    pub fn is_ok(&self) -> bool {
        !matches!(self, ApplyOutcome::Failed(_))
    }
}
