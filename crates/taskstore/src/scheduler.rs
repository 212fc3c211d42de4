//! Picks the next task to run and reclaims leases abandoned by crashed workers.

use chrono::{DateTime, Utc};
use std::collections::HashSet;

use crate::domain::{Task, TaskStatus};
use crate::state_machine;

/// Returns the first `pending` task whose dependencies are all `completed` and which
/// doesn't already carry an unexpired claim, scanning in document order.
pub fn select_next(tasks: &[Task], now: DateTime<Utc>) -> Option<&Task> {
    let completed: HashSet<&str> = tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Completed)
        .map(|t| t.id.as_str())
        .collect();

    tasks.iter().find(|t| {
        if t.status != TaskStatus::Pending {
            return false;
        }
        if let Some(claim) = &t.claim {
            if !claim.is_expired(now) {
                return false;
            }
        }
        t.depends_on.iter().all(|dep| completed.contains(dep.as_str()))
    })
}

/// For every `in_progress` task whose lease has expired: abandon it, then retry it
/// back to `pending` unless it has already exhausted `max_attempts`, in which case it
/// stays `abandoned` for a human to look at.
///
/// Returns the ids of tasks that were touched, in document order, for logging.
pub fn reclaim_expired(tasks: &mut [Task], max_attempts: u32, now: DateTime<Utc>) -> Vec<String> {
    let mut reclaimed = Vec::new();

    for task in tasks.iter_mut() {
        if task.status != TaskStatus::InProgress {
            continue;
        }
        let expired = match &task.claim {
            Some(c) => c.is_expired(now),
            None => false,
        };
        if !expired {
            continue;
        }

        let at_limit = task.history.len() as u32 + 1 >= max_attempts;
        let reason = if at_limit {
            "lease expired, max attempts reached"
        } else {
            "lease expired"
        };
        state_machine::abandon(task, reason, now).expect("in_progress -> abandoned is always legal");

        if !at_limit {
            state_machine::retry(task, max_attempts, now).expect("just-abandoned task is under max_attempts");
        }
        reclaimed.push(task.id.clone());
    }

    reclaimed
}
