//! The task store's data model: the TaskStore document and the records it contains.
//!
//! Everything here is plain data with serde impls. No I/O, no clocks except where a
//! caller explicitly passes `now` in. State transitions live in [`crate::state_machine`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub const SCHEMA_VERSION: &str = "2.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Blocked,
    Canceled,
    Abandoned,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Canceled)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Canceled => "canceled",
            TaskStatus::Abandoned => "abandoned",
        };
        f.write_str(s)
    }
}

/// Time-bounded exclusive right to work on a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub claimed_by: String,
    pub run_id: String,
    pub claimed_at: DateTime<Utc>,
    pub lease_expires_at: DateTime<Utc>,
    pub attempt: u32,
}

impl Claim {
    /// A claim expires strictly after `lease_expires_at`; equality at the boundary is
    /// still valid (not expired).
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.lease_expires_at
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VerifyResult {
    pub command: String,
    pub exit_code: i32,
    #[serde(default)]
    pub evidence: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitResult {
    pub commit: String,
    #[serde(default = "default_branch")]
    pub branch: String,
}

fn default_branch() -> String {
    "main".to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verify: Option<VerifyResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git: Option<GitResult>,
    #[serde(default)]
    pub summary: String,
}

/// One appended record per terminal outcome of a claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    pub attempt: u32,
    pub run_id: String,
    pub status: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub description: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub claim: Option<Claim>,
    #[serde(default)]
    pub result: Option<TaskResult>,
    #[serde(default)]
    pub history: Vec<Attempt>,
    #[serde(default)]
    pub notes: String,
    pub last_update: DateTime<Utc>,
}

impl Task {
    pub fn new_pending(id: impl Into<String>, description: impl Into<String>, depends_on: Vec<String>, now: DateTime<Utc>) -> Self {
        Task {
            id: id.into(),
            description: description.into(),
            status: TaskStatus::Pending,
            depends_on,
            claim: None,
            result: None,
            history: Vec::new(),
            notes: String::new(),
            last_update: now,
        }
    }
}

/// Supervisor knobs embedded in the store. Every field falls back to its documented
/// default when absent from the JSON, so an intake packet may set only the keys it cares
/// about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub lease_ttl_seconds: u64,
    pub max_attempts: u32,
    pub verify_required: bool,
    pub verify_command: String,
    pub retention_days: u64,
    pub max_runs_mb: u64,
    /// Catch-all for intake-introduced keys this crate doesn't interpret directly.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            lease_ttl_seconds: 900,
            max_attempts: 3,
            verify_required: true,
            verify_command: "scripts/verify.sh".to_string(),
            retention_days: 7,
            max_runs_mb: 100,
            extra: serde_json::Map::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStore {
    pub version: String,
    #[serde(default)]
    pub config: StoreConfig,
    #[serde(default)]
    pub tasks: Vec<Task>,
    pub last_modified: DateTime<Utc>,
}

impl TaskStore {
    pub fn new(now: DateTime<Utc>) -> Self {
        TaskStore {
            version: SCHEMA_VERSION.to_string(),
            config: StoreConfig::default(),
            tasks: Vec::new(),
            last_modified: now,
        }
    }

    pub fn task_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn existing_ids(&self) -> HashSet<String> {
        self.tasks.iter().map(|t| t.id.clone()).collect()
    }

    pub fn stats(&self) -> std::collections::BTreeMap<String, usize> {
        let mut stats = std::collections::BTreeMap::new();
        stats.insert("total".to_string(), self.tasks.len());
        for t in &self.tasks {
            *stats.entry(t.status.to_string()).or_insert(0) += 1;
        }
        stats
    }

    pub fn has_blocked(&self) -> bool {
        self.tasks.iter().any(|t| t.status == TaskStatus::Blocked)
    }
}
