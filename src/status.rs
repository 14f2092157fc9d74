//! Status code vocabulary and the shared command result shape.
//!
//! Status `0` means success. Negative sentinels and the specific positive
//! values below signal defined failure kinds; everything else is the raw
//! exit status of a remote command.

/// Parallel-run guard tripped for a (host, command) pair.
pub const ANOTHER_COMMAND_RUNNING: i32 = -5;
/// Command action kind unrecognized. Unreachable with the closed action
/// enum, kept for log compatibility.
pub const NO_COMMAND_RUNNER_FOUND: i32 = -6;
/// Reserved for a plan-level parallel guard.
pub const ANOTHER_PLAN_RUNNING: i32 = -7;
/// Plan had no lines at execution time.
pub const PLAN_IS_EMPTY: i32 = -1;
/// Nested plan ended with a non-zero status, reported upward generically.
pub const PLAN_EXECUTION_ERROR: i32 = -1;
/// Execution raised instead of producing a structured result.
pub const COMMAND_EXECUTION_ERROR: i32 = -1;
/// File-from-template target already exists or transfer failed.
pub const FILE_CREATION_FAILED: i32 = -12;
/// Plan line skipped because its gating condition was false.
pub const PLAN_LINE_CONDITION_CHECK_FAILED: i32 = -20;
/// Embedded script raised during evaluation.
pub const SCRIPT_COMMAND_ERROR: i32 = -24;
/// Transport connection failure surfaced as a non-fatal result.
pub const SSH_CONNECTION_ERROR: i32 = 503;
/// Sudo-with-password requested but no password is stored.
pub const SUDO_PASSWORD_MISSING: i32 = 255;

/// Result of one command execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub status: i32,
    pub response: Option<String>,
    pub error: Option<String>,
}

impl CommandOutcome {
    /// Successful outcome with an optional response text.
    pub fn ok(response: Option<String>) -> Self {
        Self {
            status: 0,
            response,
            error: None,
        }
    }

    /// Failed outcome with an error message.
    pub fn failed(status: i32, error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            status,
            response: None,
            error: if error.is_empty() { None } else { Some(error) },
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == 0
    }
}

/// Collapse sub-statuses from a multi-step sudo sequence: the last non-zero
/// status in original order, or `0` when all are zero.
pub fn collapse_statuses(statuses: &[i32]) -> i32 {
    statuses
        .iter()
        .rev()
        .find(|&&s| s != 0)
        .copied()
        .unwrap_or(0)
}

/// Join output lines into one text, `None` when there are none.
pub fn join_lines(lines: &[String]) -> Option<String> {
    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collapse_last_nonzero_wins() {
        assert_eq!(collapse_statuses(&[0, 1, 0, 4, 0]), 4);
        assert_eq!(collapse_statuses(&[0, 3]), 3);
        assert_eq!(collapse_statuses(&[0, 0, 0]), 0);
        assert_eq!(collapse_statuses(&[]), 0);
        assert_eq!(collapse_statuses(&[7]), 7);
    }

    #[test]
    fn test_outcome_helpers() {
        let ok = CommandOutcome::ok(Some("done".into()));
        assert!(ok.is_success());
        assert!(ok.error.is_none());
        let failed = CommandOutcome::failed(SSH_CONNECTION_ERROR, "no route");
        assert!(!failed.is_success());
        assert_eq!(failed.error.as_deref(), Some("no route"));
        let silent = CommandOutcome::failed(1, "");
        assert!(silent.error.is_none());
    }

    #[test]
    fn test_join_lines() {
        assert_eq!(join_lines(&[]), None);
        assert_eq!(
            join_lines(&["a".into(), "b".into()]).as_deref(),
            Some("a\nb")
        );
    }
}
