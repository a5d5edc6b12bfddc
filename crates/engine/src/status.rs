//! Workflow instance lifecycle states.

use serde::{Deserialize, Serialize};

/// The lifecycle status of a workflow instance.
///
/// Status transitions:
/// ```text
/// Running ──┬──► Succeeded
///           └──► Compensating ──┬──► Compensated
///                               └──► Failed
/// ```
///
/// `Succeeded`, `Compensated` and `Failed` are terminal; once reached,
/// no further transition is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum InstanceStatus {
    /// Steps are being executed.
    #[default]
    Running,

    /// A step exhausted its retries (or compensation was forced) and
    /// compensating actions are in progress.
    Compensating,

    /// Every step completed successfully (terminal).
    Succeeded,

    /// All eligible compensations completed after a failure (terminal).
    Compensated,

    /// Execution or compensation failed; partial state needs operator
    /// attention (terminal).
    Failed,
}

impl InstanceStatus {
    /// Returns true if forward execution is still possible.
    pub fn is_running(&self) -> bool {
        matches!(self, InstanceStatus::Running)
    }

    /// Returns true if compensation can begin from this status.
    pub fn can_compensate(&self) -> bool {
        matches!(self, InstanceStatus::Running)
    }

    /// Returns true for terminal statuses.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InstanceStatus::Succeeded | InstanceStatus::Compensated | InstanceStatus::Failed
        )
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Running => "Running",
            InstanceStatus::Compensating => "Compensating",
            InstanceStatus::Succeeded => "Succeeded",
            InstanceStatus::Compensated => "Compensated",
            InstanceStatus::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for InstanceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "running" => Ok(InstanceStatus::Running),
            "compensating" => Ok(InstanceStatus::Compensating),
            "succeeded" => Ok(InstanceStatus::Succeeded),
            "compensated" => Ok(InstanceStatus::Compensated),
            "failed" => Ok(InstanceStatus::Failed),
            other => Err(format!("unknown instance status '{other}'")),
        }
    }
}
