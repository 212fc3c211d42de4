//! The task state machine: pure functions over [`crate::domain::Task`], no I/O.
//!
//! Every transition here mutates a `Task` in place and returns `Err` instead of
//! leaving it in a half-updated state, so callers can run these directly inside
//! `Store::with_lock`'s closure.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{Attempt, Claim, GitResult, Task, TaskResult, TaskStatus, VerifyResult};
use crate::errors::StoreError;

/// `true` iff `to` is a legal next status from `from`.
pub fn can_transition(from: TaskStatus, to: TaskStatus) -> bool {
    use TaskStatus::*;
    matches!(
        (from, to),
        (Pending, InProgress)
            | (Pending, Canceled)
            | (InProgress, Completed)
            | (InProgress, Failed)
            | (InProgress, Blocked)
            | (InProgress, Abandoned)
            | (Failed, Pending)
            | (Failed, Canceled)
            | (Blocked, Pending)
            | (Blocked, Canceled)
            | (Abandoned, Pending)
            | (Abandoned, Canceled)
    )
}

fn invalid(task: &Task, to: TaskStatus) -> StoreError {
    StoreError::InvalidTransition {
        task_id: task.id.clone(),
        from: task.status.to_string(),
        to: to.to_string(),
    }
}

pub fn generate_run_id(now: DateTime<Utc>) -> String {
    format!(
        "run-{}-{}",
        now.format("%Y%m%d-%H%M%S"),
        &Uuid::new_v4().simple().to_string()[..8]
    )
}

pub fn generate_runner_id() -> String {
    format!("runner-pid-{}", std::process::id())
}

/// Claims a pending task, binding it to `run_id` and starting its lease.
///
/// Errors if the task isn't `pending`, or if it already carries an unexpired claim
/// (a concurrent claimant beat this one to it).
pub fn claim(
    task: &mut Task,
    claimed_by: &str,
    run_id: &str,
    lease_ttl: chrono::Duration,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    if !can_transition(task.status, TaskStatus::InProgress) {
        return Err(invalid(task, TaskStatus::InProgress));
    }
    if let Some(existing) = &task.claim {
        if !existing.is_expired(now) {
            return Err(invalid(task, TaskStatus::InProgress));
        }
    }

    let attempt = task.history.len() as u32 + 1;
    task.claim = Some(Claim {
        claimed_by: claimed_by.to_string(),
        run_id: run_id.to_string(),
        claimed_at: now,
        lease_expires_at: now + lease_ttl,
        attempt,
    });
    task.status = TaskStatus::InProgress;
    task.last_update = now;
    Ok(())
}

fn take_claim<'a>(task: &'a mut Task, run_id: &str) -> Result<Claim, StoreError> {
    let claim = task.claim.as_ref().ok_or_else(|| StoreError::NoClaim {
        task_id: task.id.clone(),
    })?;
    if claim.run_id != run_id {
        return Err(StoreError::RunIdMismatch {
            task_id: task.id.clone(),
            expected: claim.run_id.clone(),
            actual: run_id.to_string(),
        });
    }
    Ok(task.claim.take().unwrap())
}

/// Completes an in-progress task. If `verify_required`, `verify.exit_code` must be 0.
pub fn complete(
    task: &mut Task,
    run_id: &str,
    verify: Option<VerifyResult>,
    git: Option<GitResult>,
    summary: String,
    verify_required: bool,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    if !can_transition(task.status, TaskStatus::Completed) {
        return Err(invalid(task, TaskStatus::Completed));
    }
    if verify_required {
        // A missing verify result is treated the same as a hard failure (exit code -1),
        // not a silent pass — a worker can't skip the gate just by omitting the field.
        let exit_code = verify.as_ref().map(|v| v.exit_code).unwrap_or(-1);
        if exit_code != 0 {
            return Err(StoreError::VerifyFailed {
                task_id: task.id.clone(),
                exit_code,
            });
        }
    }

    let claim = take_claim(task, run_id)?;
    task.history.push(Attempt {
        attempt: claim.attempt,
        run_id: run_id.to_string(),
        status: "completed".to_string(),
        timestamp: now,
        error: String::new(),
    });
    task.result = Some(TaskResult { verify, git, summary });
    task.status = TaskStatus::Completed;
    task.last_update = now;
    Ok(())
}

/// Fails an in-progress task. Leaves it in `failed`, eligible for a manual or
/// automatic retry back to `pending` via [`retry`].
pub fn fail(task: &mut Task, run_id: &str, error: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
    if !can_transition(task.status, TaskStatus::Failed) {
        return Err(invalid(task, TaskStatus::Failed));
    }
    let claim = take_claim(task, run_id)?;
    task.history.push(Attempt {
        attempt: claim.attempt,
        run_id: run_id.to_string(),
        status: "failed".to_string(),
        timestamp: now,
        error: error.to_string(),
    });
    task.notes = error.to_string();
    task.status = TaskStatus::Failed;
    task.last_update = now;
    Ok(())
}

/// Blocks an in-progress task on a human decision. Does not consume a retry attempt.
pub fn block(task: &mut Task, run_id: &str, reason: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
    if !can_transition(task.status, TaskStatus::Blocked) {
        return Err(invalid(task, TaskStatus::Blocked));
    }
    let claim = take_claim(task, run_id)?;
    task.history.push(Attempt {
        attempt: claim.attempt,
        run_id: run_id.to_string(),
        status: "blocked".to_string(),
        timestamp: now,
        error: reason.to_string(),
    });
    task.notes = reason.to_string();
    task.status = TaskStatus::Blocked;
    task.last_update = now;
    Ok(())
}

/// Abandons an in-progress task whose lease has expired — the worker may still be
/// running, but the supervisor gives the claim up for grabs again.
pub fn abandon(task: &mut Task, reason: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
    if !can_transition(task.status, TaskStatus::Abandoned) {
        return Err(invalid(task, TaskStatus::Abandoned));
    }
    let (attempt, run_id) = match &task.claim {
        Some(c) => (c.attempt, c.run_id.clone()),
        None => (task.history.len() as u32 + 1, String::new()),
    };
    task.claim = None;
    task.history.push(Attempt {
        attempt,
        run_id,
        status: "abandoned".to_string(),
        timestamp: now,
        error: reason.to_string(),
    });
    task.status = TaskStatus::Abandoned;
    task.last_update = now;
    Ok(())
}

/// Returns a `failed`/`blocked`/`abandoned` task to `pending` for another attempt.
///
/// Errors once `history.len() >= max_attempts` — the caller should leave the task
/// where it is (or escalate it) instead of retrying forever.
pub fn retry(task: &mut Task, max_attempts: u32, now: DateTime<Utc>) -> Result<(), StoreError> {
    if task.history.len() as u32 >= max_attempts {
        return Err(StoreError::MaxAttemptsExceeded {
            task_id: task.id.clone(),
            max_attempts,
        });
    }
    if !can_transition(task.status, TaskStatus::Pending) {
        return Err(invalid(task, TaskStatus::Pending));
    }
    task.status = TaskStatus::Pending;
    task.last_update = now;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_task() -> Task {
        Task::new_pending("t1", "do the thing", vec![], Utc::now())
    }

    #[test]
    fn claim_moves_pending_to_in_progress() {
        let mut task = new_task();
        let now = Utc::now();
        claim(&mut task, "runner-1", "run-1", chrono::Duration::seconds(900), now).unwrap();
        assert_eq!(task.status, TaskStatus::InProgress);
        assert_eq!(task.claim.as_ref().unwrap().run_id, "run-1");
        assert_eq!(task.claim.as_ref().unwrap().attempt, 1);
    }

    #[test]
    fn claim_rejects_already_claimed_unexpired() {
        let mut task = new_task();
        let now = Utc::now();
        claim(&mut task, "runner-1", "run-1", chrono::Duration::seconds(900), now).unwrap();
        let err = claim(&mut task, "runner-2", "run-2", chrono::Duration::seconds(900), now);
        assert!(err.is_err());
    }

    #[test]
    fn claim_allows_reclaim_after_expiry() {
        let mut task = new_task();
        let now = Utc::now();
        claim(&mut task, "runner-1", "run-1", chrono::Duration::seconds(-1), now).unwrap();
        // lease_expires_at is now in the past; abandon + retry should free it up.
        assert!(task.claim.as_ref().unwrap().is_expired(now + chrono::Duration::seconds(1)));
    }

    #[test]
    fn complete_requires_matching_run_id() {
        let mut task = new_task();
        let now = Utc::now();
        claim(&mut task, "runner-1", "run-1", chrono::Duration::seconds(900), now).unwrap();
        let err = complete(&mut task, "run-WRONG", None, None, "done".into(), false, now);
        assert!(matches!(err, Err(StoreError::RunIdMismatch { .. })));
    }

    #[test]
    fn complete_rejects_nonzero_verify_when_required() {
        let mut task = new_task();
        let now = Utc::now();
        claim(&mut task, "runner-1", "run-1", chrono::Duration::seconds(900), now).unwrap();
        let verify = VerifyResult {
            command: "scripts/verify.sh".into(),
            exit_code: 1,
            evidence: "test failed".into(),
        };
        let err = complete(&mut task, "run-1", Some(verify), None, "done".into(), true, now);
        assert!(matches!(err, Err(StoreError::VerifyFailed { .. })));
        assert_eq!(task.status, TaskStatus::InProgress, "a rejected complete must not mutate status");
    }

    #[test]
    fn complete_rejects_missing_verify_when_required() {
        let mut task = new_task();
        let now = Utc::now();
        claim(&mut task, "runner-1", "run-1", chrono::Duration::seconds(900), now).unwrap();
        let err = complete(&mut task, "run-1", None, None, "done".into(), true, now);
        assert!(matches!(err, Err(StoreError::VerifyFailed { exit_code: -1, .. })));
        assert_eq!(task.status, TaskStatus::InProgress, "a missing verify result must not mutate status");
    }

    #[test]
    fn complete_succeeds_and_clears_claim() {
        let mut task = new_task();
        let now = Utc::now();
        claim(&mut task, "runner-1", "run-1", chrono::Duration::seconds(900), now).unwrap();
        complete(&mut task, "run-1", None, None, "done".into(), false, now).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.claim.is_none());
        assert_eq!(task.history.len(), 1);
    }

    #[test]
    fn retry_fails_once_max_attempts_reached() {
        let mut task = new_task();
        let now = Utc::now();
        for _ in 0..3 {
            claim(&mut task, "runner-1", "run-x", chrono::Duration::seconds(900), now).unwrap();
            fail(&mut task, "run-x", "boom", now).unwrap();
            if task.history.len() < 3 {
                retry(&mut task, 3, now).unwrap();
            }
        }
        assert_eq!(task.history.len(), 3);
        let err = retry(&mut task, 3, now);
        assert!(matches!(err, Err(StoreError::MaxAttemptsExceeded { .. })));
    }

    #[test]
    fn abandon_clears_claim_and_records_history() {
        let mut task = new_task();
        let now = Utc::now();
        claim(&mut task, "runner-1", "run-1", chrono::Duration::seconds(900), now).unwrap();
        abandon(&mut task, "lease expired", now).unwrap();
        assert_eq!(task.status, TaskStatus::Abandoned);
        assert!(task.claim.is_none());
        assert_eq!(task.history[0].run_id, "run-1");
    }
}
