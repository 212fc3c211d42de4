//! Gate checks run before an intake merge is committed: a schema sanity check, a
//! secrets scan, and the project's own verify command. The first non-zero result wins
//! and triggers a rollback; an absent check (e.g. no verify command configured) is
//! skipped rather than treated as failure.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use regex::Regex;

use taskstore::domain::TaskStore;

pub struct GateResult {
    pub command: String,
    pub exit_code: i32,
    pub evidence: String,
}

impl GateResult {
    fn pass(command: &str, evidence: &str) -> Self {
        GateResult {
            command: command.to_string(),
            exit_code: 0,
            evidence: evidence.to_string(),
        }
    }

    fn fail(command: &str, evidence: String) -> Self {
        GateResult {
            command: command.to_string(),
            exit_code: 1,
            evidence,
        }
    }
}

/// Structural checks on the store beyond what serde's `Deserialize` already enforces:
/// schema version and task-id uniqueness.
pub fn validate_schema(store: &TaskStore) -> GateResult {
    if store.version != taskstore::domain::SCHEMA_VERSION {
        return GateResult::fail(
            "schema validation",
            format!("expected version {}, found {}", taskstore::domain::SCHEMA_VERSION, store.version),
        );
    }

    let mut seen = std::collections::HashSet::new();
    for task in &store.tasks {
        if !seen.insert(task.id.as_str()) {
            return GateResult::fail("schema validation", format!("duplicate task id: {}", task.id));
        }
    }

    // lease_ttl_seconds/max_attempts are `#[serde(default)]`, so a config block that
    // omits them entirely deserializes the same as one that sets them explicitly to
    // zero — catch that case here, since a zero value is never legitimate.
    if store.config.lease_ttl_seconds == 0 || store.config.max_attempts == 0 {
        return GateResult::fail(
            "schema validation",
            "config missing required values: lease_ttl_seconds and max_attempts must be non-zero".to_string(),
        );
    }

    GateResult::pass("schema validation", "schema OK")
}

struct SecretPattern {
    name: &'static str,
    regex: Regex,
}

fn secret_patterns() -> Vec<SecretPattern> {
    let defs: &[(&str, &str)] = &[
        ("OpenAI API key", r"sk-[a-zA-Z0-9]{20,}"),
        ("AWS access key", r"AKIA[0-9A-Z]{16}"),
        ("private key header", r"-----BEGIN (RSA|EC|OPENSSH|DSA) PRIVATE KEY-----"),
        ("generic secret", r"(?i)(password|secret|api_key|apikey|token)\s*[=:]\s*['\x22]?[a-zA-Z0-9_\-]{16,}"),
        ("GitHub PAT", r"ghp_[a-zA-Z0-9]{36,}"),
        ("GitHub OAuth token", r"gho_[a-zA-Z0-9]{36,}"),
        ("Slack token", r"xox[baprs]-[a-zA-Z0-9\-]{10,}"),
    ];
    defs.iter()
        .map(|(name, pattern)| SecretPattern {
            name,
            regex: Regex::new(pattern).expect("static secret pattern is valid regex"),
        })
        .collect()
}

fn mask(matched: &str) -> String {
    if matched.len() > 16 {
        format!("{}...{}", &matched[..8], &matched[matched.len() - 4..])
    } else {
        format!("{}...", &matched[..matched.len().min(4)])
    }
}

/// Scans a file's contents for the configured secret patterns. Returns the first hit
/// found, since one is enough to fail the gate.
pub fn scan_text(label: &str, text: &str) -> Option<String> {
    let patterns = secret_patterns();
    for pattern in &patterns {
        if let Some(m) = pattern.regex.find(text) {
            return Some(format!("{label}: possible {} ({})", pattern.name, mask(m.as_str())));
        }
    }
    None
}

/// Scans `progress.txt`, `runs/*.json`, and the pending git diff for anything that
/// looks like a leaked credential.
pub fn scan_secrets(progress_file: &Path, runs_dir: &Path, repo_dir: &Path) -> GateResult {
    if let Ok(text) = std::fs::read_to_string(progress_file) {
        if let Some(hit) = scan_text(&progress_file.display().to_string(), &text) {
            return GateResult::fail("secrets scan", hit);
        }
    }

    if let Ok(entries) = std::fs::read_dir(runs_dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Ok(text) = std::fs::read_to_string(&path) {
                if let Some(hit) = scan_text(&path.display().to_string(), &text) {
                    return GateResult::fail("secrets scan", hit);
                }
            }
        }
    }

    if let Some(diff) = crate::vcs::pending_diff_text(repo_dir) {
        if let Some(hit) = scan_text("git diff", &diff) {
            return GateResult::fail("secrets scan", hit);
        }
    }

    GateResult::pass("secrets scan", "no secrets found")
}

/// Runs the project's configured verify command with a generous fixed timeout, the
/// same way intake's gate checks run it before committing a merge (as opposed to a
/// task's own verify step, which uses the worker-reported result).
pub fn run_verify_command(command: &str, working_dir: &Path) -> Result<GateResult> {
    if command.trim().is_empty() {
        return Ok(GateResult::pass("verify", "no verify command configured"));
    }
    let output = crate::exec::run_with_timeout(command, Duration::from_secs(60), &HashMap::new(), working_dir)?;
    let evidence = if output.stdout.is_empty() { output.stderr } else { output.stdout };
    Ok(GateResult {
        command: command.to_string(),
        exit_code: output.exit_code.unwrap_or(-1),
        evidence,
    })
}

/// Runs schema validation, then the secrets scan, then the verify command, stopping at
/// the first non-zero result. Returns a passing result naming "all gate checks" if
/// every stage passes.
pub fn run_gate_checks(store: &TaskStore, progress_file: &Path, runs_dir: &Path, verify_command: &str, working_dir: &Path) -> Result<GateResult> {
    let schema = validate_schema(store);
    if schema.exit_code != 0 {
        return Ok(schema);
    }

    let secrets = scan_secrets(progress_file, runs_dir, working_dir);
    if secrets.exit_code != 0 {
        return Ok(secrets);
    }

    let verify = run_verify_command(verify_command, working_dir)?;
    if verify.exit_code != 0 {
        return Ok(verify);
    }

    Ok(GateResult::pass("all gate checks", "all gate checks passed"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use taskstore::domain::Task;

    #[test]
    fn schema_validation_catches_duplicate_ids() {
        let mut store = TaskStore::new(Utc::now());
        store.tasks.push(Task::new_pending("t1", "a", vec![], Utc::now()));
        store.tasks.push(Task::new_pending("t1", "b", vec![], Utc::now()));
        let result = validate_schema(&store);
        assert_eq!(result.exit_code, 1);
    }

    #[test]
    fn schema_validation_catches_zeroed_required_config() {
        let mut store = TaskStore::new(Utc::now());
        store.config.max_attempts = 0;
        let result = validate_schema(&store);
        assert_eq!(result.exit_code, 1);
    }

    #[test]
    fn secrets_scan_flags_openai_style_key() {
        let hit = scan_text("test", "api_key: sk-abcdefghijklmnopqrstuvwxyz123456");
        assert!(hit.is_some());
    }

    #[test]
    fn secrets_scan_clean_text_passes() {
        let hit = scan_text("test", "just a normal log line with no credentials");
        assert!(hit.is_none());
    }
}
