//! Append-only, human-readable event log. Every event is a banner-delimited block
//! terminated by a blank line, so a human can `tail -f progress.txt` and a machine can
//! split on the blank-line separator if it wants to.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::domain::{GitResult, VerifyResult};
use crate::errors::StoreError;

const BANNER: &str = "============================================================";

pub struct ProgressLog {
    path: PathBuf,
}

impl ProgressLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, content: &str) -> Result<(), StoreError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| StoreError::Io {
                path: self.path.clone(),
                source,
            })?;
        file.write_all(content.as_bytes())
            .and_then(|_| file.write_all(b"\n"))
            .map_err(|source| StoreError::Io {
                path: self.path.clone(),
                source,
            })
    }

    fn timestamp(now: DateTime<Utc>) -> String {
        now.format("%Y-%m-%d %H:%M:%S UTC").to_string()
    }

    pub fn log_startup(&self, runner_id: &str, lease_ttl_seconds: u64, max_attempts: u32, verify_required: bool, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.append(&format!(
            "{banner}\n[{ts}] STARTUP: {runner_id}\nlease_ttl_seconds: {lease_ttl_seconds}\nmax_attempts: {max_attempts}\nverify_required: {verify_required}\n{banner}",
            banner = BANNER,
            ts = Self::timestamp(now),
        ))
    }

    pub fn log_claim(
        &self,
        task_id: &str,
        run_id: &str,
        description: &str,
        attempt: u32,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.append(&format!(
            "{banner}\n[{ts}] CLAIM: {task_id}\nrun_id: {run_id}\nattempt: {attempt}/{max_attempts}\nstatus: pending -> in_progress\ndescription: {description}",
            banner = BANNER,
            ts = Self::timestamp(now),
        ))
    }

    #[allow(clippy::too_many_arguments)]
    pub fn log_complete(
        &self,
        task_id: &str,
        run_id: &str,
        summary: &str,
        verify: Option<&VerifyResult>,
        git: Option<&GitResult>,
        duration_seconds: f64,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut body = format!(
            "{banner}\n[{ts}] COMPLETE: {task_id}\nrun_id: {run_id}\n",
            banner = BANNER,
            ts = Self::timestamp(now),
        );
        if let Some(v) = verify {
            body.push_str(&format!("verify_command: {}\nverify_exit_code: {}\n", v.command, v.exit_code));
        }
        if let Some(g) = git {
            body.push_str(&format!("git_commit: {} ({})\n", g.commit, g.branch));
        }
        body.push_str(&format!("summary: {summary}\nduration_seconds: {duration_seconds:.1}\nresult: success"));
        self.append(&body)
    }

    pub fn log_fail(
        &self,
        task_id: &str,
        run_id: &str,
        error: &str,
        attempt: u32,
        max_attempts: u32,
        duration_seconds: f64,
        can_retry: bool,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let next_step = if can_retry { "automatic retry" } else { "needs human intervention" };
        self.append(&format!(
            "{banner}\n[{ts}] FAIL: {task_id}\nrun_id: {run_id}\nerror: {error}\nattempt: {attempt}/{max_attempts}\nduration_seconds: {duration_seconds:.1}\nresult: failure\nnext_step: {next_step}",
            banner = BANNER,
            ts = Self::timestamp(now),
        ))
    }

    pub fn log_block(&self, task_id: &str, run_id: &str, reason: &str, duration_seconds: f64, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.append(&format!(
            "{banner}\n[{ts}] BLOCK: {task_id}\nrun_id: {run_id}\nreason: {reason}\nduration_seconds: {duration_seconds:.1}\n--- Human Help Packet ---\ntask_id: {task_id}\nrun_id: {run_id}\nreason: {reason}\nsuggested actions: inspect the task, fix the blocker, set status back to pending\n--- End Packet ---",
            banner = BANNER,
            ts = Self::timestamp(now),
        ))
    }

    pub fn log_abandon(&self, task_id: &str, run_id: &str, reason: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.append(&format!(
            "[{ts}] ABANDON: {task_id} run_id={run_id} reason={reason}",
            ts = Self::timestamp(now),
        ))
    }

    pub fn log_reclaim(&self, task_id: &str, old_run_id: &str, new_status: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.append(&format!(
            "[{ts}] RECLAIM: {task_id} old_run_id={old_run_id} new_status={new_status}",
            ts = Self::timestamp(now),
        ))
    }

    pub fn log_stop(&self, reason: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.append(&format!(
            "{banner}\n[{ts}] STOP: {reason}\n{banner}",
            banner = BANNER,
            ts = Self::timestamp(now),
        ))
    }

    pub fn log_pause(&self, reason: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.append(&format!("[{ts}] PAUSE: {reason}", ts = Self::timestamp(now)))
    }

    pub fn log_resume(&self, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.append(&format!("[{ts}] RESUME", ts = Self::timestamp(now)))
    }

    pub fn log_verify_fail(&self, task_id: &str, run_id: &str, verify: &VerifyResult, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.append(&format!(
            "[{ts}] VERIFY_FAIL: {task_id} run_id={run_id} command={} exit_code={} evidence={}",
            verify.command, verify.exit_code, verify.evidence,
            ts = Self::timestamp(now),
        ))
    }

    pub fn log_run_id_mismatch(&self, task_id: &str, expected_run_id: &str, actual_run_id: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.append(&format!(
            "[{ts}] RUN_ID_MISMATCH: {task_id} expected={expected_run_id} actual={actual_run_id}",
            ts = Self::timestamp(now),
        ))
    }

    pub fn log_intake_start(&self, req_id: &str, run_id: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.append(&format!(
            "{banner}\n[{ts}] INTAKE_START: {req_id}\nrun_id: {run_id}",
            banner = BANNER,
            ts = Self::timestamp(now),
        ))
    }

    #[allow(clippy::too_many_arguments)]
    pub fn log_intake_complete(
        &self,
        req_id: &str,
        run_id: &str,
        tasks_added: &[String],
        config_updated: bool,
        verify: &VerifyResult,
        git: Option<&GitResult>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut body = format!(
            "{banner}\n[{ts}] INTAKE_COMPLETE: {req_id}\nrun_id: {run_id}\ntasks_added: {}\nconfig_updated: {config_updated}\nverify_command: {}\nverify_exit_code: {}\n",
            tasks_added.join(", "),
            verify.command,
            verify.exit_code,
            banner = BANNER,
            ts = Self::timestamp(now),
        );
        if let Some(g) = git {
            body.push_str(&format!("git_commit: {} ({})", g.commit, g.branch));
        }
        self.append(&body)
    }

    pub fn log_intake_fail(&self, req_id: &str, run_id: &str, error: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.append(&format!(
            "{banner}\n[{ts}] INTAKE_FAIL: {req_id}\nrun_id: {run_id}\nerror: {error}\n{banner}",
            banner = BANNER,
            ts = Self::timestamp(now),
        ))
    }
}
