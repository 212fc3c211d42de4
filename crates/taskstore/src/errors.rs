//! Domain errors for the durable store, state machine, and scheduler, plus an
//! `ActionableError` formatter for turning one into a human-facing message with
//! causes and remediation steps.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("could not acquire exclusive lock on {path} after {timeout_secs}s")]
    LockTimeout { path: PathBuf, timeout_secs: u64 },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Task.json at {path} is not valid JSON: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid transition for task {task_id}: {from} -> {to}")]
    InvalidTransition {
        task_id: String,
        from: String,
        to: String,
    },

    #[error("task {task_id} has no claim")]
    NoClaim { task_id: String },

    #[error("run_id mismatch on task {task_id}: expected {expected}, got {actual}")]
    RunIdMismatch {
        task_id: String,
        expected: String,
        actual: String,
    },

    #[error("verify failed for task {task_id}: exit_code={exit_code}")]
    VerifyFailed { task_id: String, exit_code: i32 },

    #[error("task {task_id} exceeded max_attempts ({max_attempts})")]
    MaxAttemptsExceeded { task_id: String, max_attempts: u32 },

    #[error("task {task_id} not found")]
    TaskNotFound { task_id: String },

    #[error("duplicate task id: {task_id}")]
    DuplicateTaskId { task_id: String },
}

/// An error with diagnostic context and remediation steps, rendered as a multi-line
/// message: the statement, then likely causes, then suggested fixes.
#[derive(Debug, Clone)]
pub struct ActionableError {
    error: String,
    causes: Vec<String>,
    remediation: Vec<String>,
}

impl ActionableError {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            causes: Vec::new(),
            remediation: Vec::new(),
        }
    }

    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.causes.push(cause.into());
        self
    }

    pub fn with_remedy(mut self, remedy: impl Into<String>) -> Self {
        self.remediation.push(remedy.into());
        self
    }

    pub fn to_error_message(&self) -> String {
        let mut msg = format!("Error: {}\n", self.error);

        if !self.causes.is_empty() {
            msg.push_str("\nPossible causes:\n");
            for cause in &self.causes {
                msg.push_str(&format!("  • {}\n", cause));
            }
        }

        if !self.remediation.is_empty() {
            msg.push_str("\nTo fix:\n");
            for remedy in &self.remediation {
                msg.push_str(&format!("  • {}\n", remedy));
            }
        }

        msg
    }
}

impl fmt::Display for ActionableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_error_message())
    }
}

impl std::error::Error for ActionableError {}

impl From<&StoreError> for ActionableError {
    fn from(err: &StoreError) -> Self {
        match err {
            StoreError::LockTimeout { path, timeout_secs } => {
                ActionableError::new(err.to_string())
                    .with_cause("another supervisor process holds the lock")
                    .with_cause("a crashed process left the lock file behind (harmless but worth checking)")
                    .with_remedy(format!("inspect {}.lock and the process holding it", path.display()))
                    .with_remedy(format!("retry, or raise the timeout above {}s", timeout_secs))
            }
            StoreError::Corrupt { path, .. } => ActionableError::new(err.to_string())
                .with_cause("a previous write was interrupted before this crate's atomic rename took effect")
                .with_cause("the file was hand-edited into invalid JSON")
                .with_remedy(format!("restore {} from a backup or git history", path.display()))
                .with_remedy("do not let the supervisor overwrite a corrupt store; fix it by hand first"),
            StoreError::InvalidTransition { task_id, from, to } => {
                ActionableError::new(err.to_string())
                    .with_cause("two supervisors raced on the same task")
                    .with_cause("the task's status was edited by hand between reads")
                    .with_remedy(format!("inspect task {task_id}'s history and current status"))
                    .with_remedy(format!("valid transitions from {from} do not include {to}"))
            }
            StoreError::RunIdMismatch { task_id, .. } => ActionableError::new(err.to_string())
                .with_cause("a stale worker from a previous claim is still reporting in")
                .with_cause("two workers were spawned for the same task concurrently")
                .with_remedy(format!("check runs/ for task {task_id}'s recent archives")),
            StoreError::MaxAttemptsExceeded { task_id, .. } => {
                ActionableError::new(err.to_string())
                    .with_cause("the worker has failed this task repeatedly")
                    .with_remedy(format!("review task {task_id}'s history for the recurring failure"))
                    .with_remedy("raise max_attempts in config, or fix the underlying blocker and set status back to pending by hand")
            }
            _ => ActionableError::new(err.to_string()),
        }
    }
}
