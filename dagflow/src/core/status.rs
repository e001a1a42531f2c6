//! Step execution status.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The execution status of a step within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Step has not started yet.
    Pending,
    /// Step handler is currently executing.
    Running,
    /// Step completed and its outputs are recorded.
    Succeeded,
    /// Step handler reported a failure.
    Failed,
    /// Step was never dispatched (gated-off branch or upstream failure).
    Skipped,
}

impl Default for StepStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

impl StepStatus {
    /// Returns true if the status is terminal.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }

    /// Returns true if the status counts toward an overall successful run.
    ///
    /// A skipped step is not a failure: a gated-off branch is an expected
    /// outcome, not an error.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Skipped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display() {
        assert_eq!(StepStatus::Succeeded.to_string(), "succeeded");
        assert_eq!(StepStatus::Skipped.to_string(), "skipped");
        assert_eq!(StepStatus::Failed.to_string(), "failed");
    }

    #[test]
    fn test_status_is_terminal() {
        assert!(StepStatus::Succeeded.is_terminal());
        assert!(StepStatus::Failed.is_terminal());
        assert!(StepStatus::Skipped.is_terminal());
        assert!(!StepStatus::Pending.is_terminal());
        assert!(!StepStatus::Running.is_terminal());
    }

    #[test]
    fn test_status_is_success() {
        assert!(StepStatus::Succeeded.is_success());
        assert!(StepStatus::Skipped.is_success());
        assert!(!StepStatus::Failed.is_success());
        assert!(!StepStatus::Pending.is_success());
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&StepStatus::Skipped).unwrap();
        assert_eq!(json, r#""skipped""#);
        let back: StepStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, StepStatus::Skipped);
    }
}
