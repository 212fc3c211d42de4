//! The supervisor loop: reclaim expired leases, pick a task, claim it, invoke the
//! worker, adjudicate its report against the state machine, and repeat — honoring
//! `STOP`/`PAUSE` signal files and a circuit breaker on consecutive failures.

use std::path::Path;
use std::time::Instant;

use anyhow::Result;
use taskstore::domain::{GitResult, TaskStatus, VerifyResult};
use taskstore::progress_log::ProgressLog;
use taskstore::scheduler;
use taskstore::state_machine;
use taskstore::storage::Store;

use crate::config::RuntimeConfig;
use crate::output::{Level, OutputContext};
use crate::prompt;
use crate::worker::WorkerInvoker;

pub struct Supervisor {
    pub store: Store,
    pub progress: ProgressLog,
    pub config: RuntimeConfig,
    pub worker: WorkerInvoker,
    pub runner_id: String,
}

pub enum StopReason {
    StopFile,
    PauseFile,
    BlockedTasks,
    CircuitBreaker,
    NoMoreWork,
    CountReached,
}

impl Supervisor {
    pub fn new(store: Store, progress: ProgressLog, config: RuntimeConfig, worker: WorkerInvoker) -> Self {
        let runner_id = state_machine::generate_runner_id();
        Self { store, progress, config, worker, runner_id }
    }

    fn check_stop(&self) -> bool {
        self.config.stop_file.exists()
    }

    fn check_pause(&self) -> bool {
        self.config.pause_file.exists()
    }

    fn has_blocked(&self) -> Result<bool> {
        let snapshot = self.store.snapshot()?;
        Ok(snapshot.has_blocked())
    }

    /// Writes `ALERT.txt` for an operator to notice and clear. Best-effort: a write
    /// failure here must not prevent the loop from halting on the condition that
    /// triggered it.
    fn write_alert(&self, alert_type: &str, suggested_actions: &str) -> Result<()> {
        let now = chrono::Utc::now();
        let body = format!(
            "type: {alert_type}\ntimestamp: {}\nsuggested actions: {suggested_actions}\n",
            now.to_rfc3339()
        );
        std::fs::write(&self.config.alert_file, body).ok();
        Ok(())
    }

    /// Runs up to `max_count` task attempts (unbounded if `None`), returning why it
    /// stopped.
    pub fn run_loop(&self, out: &OutputContext, max_count: Option<u32>) -> Result<StopReason> {
        let now = chrono::Utc::now();
        self.progress.log_startup(&self.runner_id, self.config.lease_ttl_seconds, self.config.max_attempts, self.config.verify_required, now)?;

        let mut count = 0u32;
        let mut consecutive_failures = 0u32;

        loop {
            if self.check_stop() {
                self.progress.log_stop("STOP file detected", chrono::Utc::now())?;
                return Ok(StopReason::StopFile);
            }
            if self.check_pause() {
                self.progress.log_pause("PAUSE file detected", chrono::Utc::now())?;
                out.log(Level::Warning, "paused; waiting for PAUSE file to be removed");
                while self.check_pause() {
                    if self.check_stop() {
                        self.progress.log_stop("STOP file detected while paused", chrono::Utc::now())?;
                        return Ok(StopReason::StopFile);
                    }
                    std::thread::sleep(std::time::Duration::from_secs(5));
                }
                self.progress.log_resume(chrono::Utc::now())?;
            }
            if self.has_blocked()? {
                self.write_alert("blocked_task", "one or more tasks are blocked; resolve them or clear their status before resuming the loop")?;
                self.progress.log_stop("blocked tasks exist", chrono::Utc::now())?;
                return Ok(StopReason::BlockedTasks);
            }
            if let Some(limit) = max_count {
                if count >= limit {
                    return Ok(StopReason::CountReached);
                }
            }

            match self.execute_one_task(out)? {
                Some(true) => {
                    count += 1;
                    consecutive_failures = 0;
                }
                Some(false) => {
                    count += 1;
                    consecutive_failures += 1;
                    if consecutive_failures >= self.config.max_failures {
                        self.progress.log_stop(&format!("max failures reached: {consecutive_failures}"), chrono::Utc::now())?;
                        return Ok(StopReason::CircuitBreaker);
                    }
                }
                None => return Ok(StopReason::NoMoreWork),
            }

            std::thread::sleep(self.config.loop_delay);
        }
    }

    /// Reclaims expired leases, selects and claims the next task, invokes the worker,
    /// and adjudicates the result. Returns `None` if there was nothing to do,
    /// `Some(true)` on a successful completion, `Some(false)` on any other outcome.
    pub fn execute_one_task(&self, out: &OutputContext) -> Result<Option<bool>> {
        self.reclaim_expired()?;

        let now = chrono::Utc::now();
        let selected_id = {
            let snapshot = self.store.snapshot()?;
            scheduler::select_next(&snapshot.tasks, now).map(|t| t.id.clone())
        };
        let Some(task_id) = selected_id else {
            out.log(Level::Info, "no eligible task (none pending, or all blocked on dependencies/claims)");
            return Ok(None);
        };

        let run_id = state_machine::generate_run_id(now);
        let (description, depends_on, attempt) = self.store.with_lock(|doc| {
            let task = doc.task_mut(&task_id).ok_or_else(|| taskstore::errors::StoreError::TaskNotFound { task_id: task_id.clone() })?;
            state_machine::claim(task, &self.runner_id, &run_id, self.config.lease_ttl(), now)?;
            Ok((task.description.clone(), task.depends_on.clone(), task.claim.as_ref().map(|c| c.attempt).unwrap_or(1)))
        })?;

        self.progress.log_claim(&task_id, &run_id, &description, attempt, self.config.max_attempts, now)?;
        out.log(Level::Info, format!("claimed {task_id} (attempt {attempt}/{} )", self.config.max_attempts));

        let started = Instant::now();
        let prompt_text = prompt::build_task_prompt(&task_id, &run_id, &description, &depends_on, attempt, self.config.max_attempts, &self.config.verify_command);
        let (ok, report, raw_output) = self.worker.run(&prompt_text, &run_id)?;
        let duration = started.elapsed().as_secs_f64();

        if !ok {
            return self.adjudicate_failure(&task_id, &run_id, &raw_output, attempt, duration, out);
        }
        let report = report.expect("ok=true implies a parsed report");

        if report.task_id != task_id || report.run_id != run_id {
            self.progress.log_run_id_mismatch(&task_id, &run_id, &report.run_id, chrono::Utc::now())?;
            return self.adjudicate_failure(&task_id, &run_id, "run_id mismatch", attempt, duration, out);
        }

        match report.status.as_str() {
            "completed" => self.adjudicate_completion(&task_id, &run_id, report, duration, out),
            "blocked" => {
                self.store.with_lock(|doc| {
                    let task = doc.task_mut(&task_id).ok_or_else(|| taskstore::errors::StoreError::TaskNotFound { task_id: task_id.clone() })?;
                    state_machine::block(task, &run_id, &report.error, chrono::Utc::now())
                })?;
                self.progress.log_block(&task_id, &run_id, &report.error, duration, chrono::Utc::now())?;
                self.write_alert("task_blocked", &format!("task {task_id} reported blocked: {}. Resolve the blocker, then move the task back to pending or cancel it.", report.error))?;
                out.log(Level::Warning, format!("{task_id} blocked: {}", report.error));
                Ok(Some(false))
            }
            _ => self.adjudicate_failure(&task_id, &run_id, &report.error, attempt, duration, out),
        }
    }

    fn adjudicate_completion(&self, task_id: &str, run_id: &str, report: crate::worker::WorkerReport, duration: f64, out: &OutputContext) -> Result<Option<bool>> {
        if self.config.verify_required {
            // A worker that reports "completed" with no verify field at all doesn't get a
            // free pass — treat it the same as the state machine does, as exit code -1.
            let synthetic;
            let verify = match &report.verify {
                Some(v) => v,
                None => {
                    synthetic = VerifyResult { command: String::new(), exit_code: -1, evidence: "worker reported no verify result".to_string() };
                    &synthetic
                }
            };
            if verify.exit_code != 0 {
                self.progress.log_verify_fail(task_id, run_id, verify, chrono::Utc::now())?;
                return self.adjudicate_failure(task_id, run_id, &format!("verify failed: {}", verify.evidence), 0, duration, out);
            }
        }

        let repo_dir = self.config.task_file.parent().unwrap_or(Path::new("."));
        let git = report.git.clone().or_else(|| {
            let commit = crate::exec::git_commit(repo_dir)?;
            let branch = crate::exec::git_branch(repo_dir).unwrap_or_else(|| "main".to_string());
            Some(GitResult { commit, branch })
        });
        let verify: Option<VerifyResult> = report.verify.clone();

        self.store.with_lock(|doc| {
            let task = doc.task_mut(task_id).ok_or_else(|| taskstore::errors::StoreError::TaskNotFound { task_id: task_id.to_string() })?;
            state_machine::complete(task, run_id, verify.clone(), git.clone(), report.summary.clone(), self.config.verify_required, chrono::Utc::now())
        })?;

        self.progress.log_complete(task_id, run_id, &report.summary, verify.as_ref(), git.as_ref(), duration, chrono::Utc::now())?;
        out.log(Level::Success, format!("{task_id} completed"));
        Ok(Some(true))
    }

    /// Leaves the task in `failed` — a worker-reported failure is never auto-retried
    /// here. Only `reclaim_expired` (an expired lease on a still-`in_progress` task)
    /// drives a task back to `pending`; a `failed` task waits for a human, or for
    /// whatever process moves it back to `pending` by hand.
    fn adjudicate_failure(&self, task_id: &str, run_id: &str, error: &str, attempt: u32, duration: f64, out: &OutputContext) -> Result<Option<bool>> {
        self.store.with_lock(|doc| {
            let task = doc.task_mut(task_id).ok_or_else(|| taskstore::errors::StoreError::TaskNotFound { task_id: task_id.to_string() })?;
            state_machine::fail(task, run_id, error, chrono::Utc::now())
        })?;

        let can_retry = attempt < self.config.max_attempts;
        self.progress.log_fail(task_id, run_id, error, attempt, self.config.max_attempts, duration, can_retry, chrono::Utc::now())?;
        out.log(Level::Error, format!("{task_id} failed: {error}"));

        Ok(Some(false))
    }

    pub fn reclaim_expired_and_report(&self, out: &OutputContext) -> Result<()> {
        let before = self.store.snapshot()?.stats();
        self.reclaim_expired()?;
        let after = self.store.snapshot()?.stats();
        let before_in_progress = before.get("in_progress").copied().unwrap_or(0);
        let after_in_progress = after.get("in_progress").copied().unwrap_or(0);
        out.log(Level::Info, format!("reclaimed {} expired lease(s)", before_in_progress.saturating_sub(after_in_progress)));
        Ok(())
    }

    fn reclaim_expired(&self) -> Result<()> {
        let now = chrono::Utc::now();
        let reclaimed: Vec<(String, String)> = self.store.with_lock(|doc| {
            let before: Vec<(String, Option<String>)> = doc.tasks.iter().map(|t| (t.id.clone(), t.claim.as_ref().map(|c| c.run_id.clone()))).collect();
            let touched = scheduler::reclaim_expired(&mut doc.tasks, self.config.max_attempts, now);
            let touched_set: std::collections::HashSet<&String> = touched.iter().collect();
            Ok(before
                .into_iter()
                .filter(|(id, _)| touched_set.contains(id))
                .map(|(id, run_id)| (id, run_id.unwrap_or_default()))
                .collect())
        })?;

        for (task_id, old_run_id) in &reclaimed {
            let new_status = {
                let snapshot = self.store.snapshot()?;
                snapshot.task(task_id).map(|t| t.status).unwrap_or(TaskStatus::Abandoned)
            };
            self.progress.log_reclaim(task_id, old_run_id, &new_status.to_string(), now)?;
        }
        Ok(())
    }

    pub fn show_status(&self, out: &OutputContext) -> Result<()> {
        let snapshot = self.store.snapshot()?;
        let stats = snapshot.stats();
        if out.is_json() {
            out.print_json(&serde_json::json!({ "stats": stats, "stop": self.check_stop(), "pause": self.check_pause() }));
            return Ok(());
        }
        for (status, count) in &stats {
            out.log(Level::Info, format!("{status}: {count}"));
        }
        if self.check_stop() {
            out.log(Level::Warning, "STOP file present");
        }
        if self.check_pause() {
            out.log(Level::Warning, "PAUSE file present");
        }
        if snapshot.has_blocked() {
            out.log(Level::Warning, "one or more tasks are blocked");
        }
        Ok(())
    }
}
