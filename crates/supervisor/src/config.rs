//! Per-invocation configuration: the store's embedded `config` object, overlaid with
//! whatever the caller passed on the command line. CLI flags always win, so an operator
//! can temporarily loosen a setting without editing Task.json.

use std::path::PathBuf;
use std::time::Duration;

use taskstore::domain::StoreConfig;

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub task_file: PathBuf,
    pub progress_file: PathBuf,
    pub claude_md: PathBuf,
    pub runs_dir: PathBuf,
    pub inbox_dir: PathBuf,
    pub stop_file: PathBuf,
    pub pause_file: PathBuf,
    pub alert_file: PathBuf,
    pub status_file: PathBuf,
    pub lock_timeout: Duration,
    pub loop_delay: Duration,
    pub max_failures: u32,
    pub lease_ttl_seconds: u64,
    pub max_attempts: u32,
    pub verify_required: bool,
    pub verify_command: String,
    pub retention_days: u64,
    pub max_runs_mb: u64,
    pub max_turns: u32,
    pub worker_timeout: Duration,
    pub worker_binary: String,
}

impl RuntimeConfig {
    pub fn from_store_config(base_dir: &std::path::Path, store: &StoreConfig) -> Self {
        RuntimeConfig {
            task_file: base_dir.join("Task.json"),
            progress_file: base_dir.join("progress.txt"),
            claude_md: base_dir.join("CLAUDE.md"),
            runs_dir: base_dir.join("runs"),
            inbox_dir: base_dir.join("inbox"),
            stop_file: base_dir.join("STOP"),
            pause_file: base_dir.join("PAUSE"),
            alert_file: base_dir.join("ALERT.txt"),
            status_file: base_dir.join("status.md"),
            lock_timeout: Duration::from_secs(5),
            loop_delay: Duration::from_secs(3),
            max_failures: 3,
            lease_ttl_seconds: store.lease_ttl_seconds,
            max_attempts: store.max_attempts,
            verify_required: store.verify_required,
            verify_command: store.verify_command.clone(),
            retention_days: store.retention_days,
            max_runs_mb: store.max_runs_mb,
            max_turns: 50,
            worker_timeout: Duration::from_secs(900),
            worker_binary: "claude".to_string(),
        }
    }

    pub fn lease_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.lease_ttl_seconds as i64)
    }
}

/// Overrides sourced from CLI flags; `None` means "keep whatever the store/default said".
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub max_turns: Option<u32>,
    pub timeout_seconds: Option<u64>,
    pub lease_ttl_seconds: Option<u64>,
    pub max_attempts: Option<u32>,
    pub verify_command: Option<String>,
}

impl ConfigOverrides {
    pub fn apply(&self, config: &mut RuntimeConfig) {
        if let Some(v) = self.max_turns {
            config.max_turns = v;
        }
        if let Some(v) = self.timeout_seconds {
            config.worker_timeout = Duration::from_secs(v);
        }
        if let Some(v) = self.lease_ttl_seconds {
            config.lease_ttl_seconds = v;
        }
        if let Some(v) = self.max_attempts {
            config.max_attempts = v;
        }
        if let Some(v) = &self.verify_command {
            config.verify_command = v.clone();
        }
    }
}
