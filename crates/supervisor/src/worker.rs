//! Invokes the worker subprocess for one task attempt, parses its structured result,
//! and archives the raw transcript for audit.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use taskstore::domain::{GitResult, VerifyResult};

use crate::exec;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkerReport {
    pub task_id: String,
    pub run_id: String,
    pub status: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub verify: Option<VerifyResult>,
    #[serde(default)]
    pub git: Option<GitResult>,
}

#[derive(Debug, Serialize)]
struct RunArchive<'a> {
    run_id: &'a str,
    timestamp: String,
    stdout: &'a str,
    stderr: &'a str,
    parsed_result: &'a Option<WorkerReport>,
}

pub struct WorkerInvoker {
    pub binary: PathBuf,
    pub max_turns: u32,
    pub timeout: Duration,
    pub runs_dir: PathBuf,
    pub working_dir: PathBuf,
}

impl WorkerInvoker {
    /// Resolves the worker binary from `$PATH`, falling back to the literal name so the
    /// caller's own spawn error message is the one the user sees.
    pub fn resolve_binary(name: &str) -> PathBuf {
        which::which(name).unwrap_or_else(|_| PathBuf::from(name))
    }

    pub fn run(&self, prompt: &str, run_id: &str) -> Result<(bool, Option<WorkerReport>, String)> {
        let mut env: HashMap<String, String> = std::env::vars().collect();
        env.remove("CLAUDECODE");

        let command = shell_invocation(&self.binary, self.max_turns, prompt);
        let output = exec::run_with_timeout(&command, self.timeout, &env, &self.working_dir)
            .with_context(|| format!("failed to invoke worker for run {run_id}"))?;

        let parsed = parse_worker_output(&output.stdout);
        self.archive(run_id, &output.stdout, &output.stderr, &parsed)?;

        if output.timed_out {
            return Ok((false, None, format!("worker timed out after {:?}", self.timeout)));
        }
        match output.exit_code {
            Some(0) => {}
            Some(code) => return Ok((false, parsed, format!("worker exited with status {code}: {}", output.stderr))),
            None => return Ok((false, parsed, "worker terminated without an exit status".to_string())),
        }

        match parsed {
            Some(report) => Ok((true, Some(report), output.stdout)),
            None => Ok((false, None, format!("worker produced no parseable result:\n{}", output.stdout))),
        }
    }

    fn archive(&self, run_id: &str, stdout: &str, stderr: &str, parsed: &Option<WorkerReport>) -> Result<()> {
        std::fs::create_dir_all(&self.runs_dir)?;
        let archive = RunArchive {
            run_id,
            timestamp: Utc::now().to_rfc3339(),
            stdout: truncate(stdout, 50_000),
            stderr: truncate(stderr, 10_000),
            parsed_result: parsed,
        };
        let path = self.runs_dir.join(format!("{run_id}.json"));
        let serialized = serde_json::to_string_pretty(&archive)?;
        std::fs::write(path, serialized)?;
        Ok(())
    }
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        s
    } else {
        &s[..max]
    }
}

fn shell_invocation(binary: &Path, max_turns: u32, prompt: &str) -> String {
    format!(
        "{} -p --no-session-persistence --dangerously-skip-permissions --output-format json --max-turns {} {}",
        binary.display(),
        max_turns,
        shell_quote(prompt),
    )
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

/// Two-stage extraction: first treat stdout as a `{"result": "..."}` wrapper (the CLI's
/// own `--output-format json` envelope) and recurse into its `result` field; failing
/// that, scan for a standalone JSON object or fenced ```json block containing
/// `task_id`+`status`, from the end of the output backward (the worker's final answer).
pub fn parse_worker_output(stdout: &str) -> Option<WorkerReport> {
    if let Ok(wrapper) = serde_json::from_str::<serde_json::Value>(stdout.trim()) {
        if let Some(inner) = wrapper.get("result").and_then(|v| v.as_str()) {
            if let Some(report) = extract_task_result(inner) {
                return Some(report);
            }
        }
    }
    extract_task_result(stdout)
}

fn extract_task_result(text: &str) -> Option<WorkerReport> {
    if let Some(report) = scan_lines_for_object(text) {
        return Some(report);
    }
    scan_fenced_blocks(text)
}

fn scan_lines_for_object(text: &str) -> Option<WorkerReport> {
    let lines: Vec<&str> = text.lines().collect();
    for i in (0..lines.len()).rev() {
        let candidate = lines[i].trim();
        if candidate.starts_with('{') && candidate.ends_with('}') {
            if let Ok(report) = serde_json::from_str::<WorkerReport>(candidate) {
                return Some(report);
            }
        }
    }
    // Fall back to the last brace-balanced object spanning multiple lines.
    if let Some(obj) = last_balanced_object(text) {
        if let Ok(report) = serde_json::from_str::<WorkerReport>(&obj) {
            return Some(report);
        }
    }
    None
}

fn last_balanced_object(text: &str) -> Option<String> {
    let bytes: Vec<char> = text.chars().collect();
    let mut end = None;
    for i in (0..bytes.len()).rev() {
        if bytes[i] == '}' {
            end = Some(i);
            break;
        }
    }
    let end = end?;
    let mut depth = 0i32;
    for i in (0..=end).rev() {
        match bytes[i] {
            '}' => depth += 1,
            '{' => {
                depth -= 1;
                if depth == 0 {
                    return Some(bytes[i..=end].iter().collect());
                }
            }
            _ => {}
        }
    }
    None
}

fn scan_fenced_blocks(text: &str) -> Option<WorkerReport> {
    let re = Regex::new(r"```json\s*\n(\{[\s\S]*?\})\s*\n```").ok()?;
    let mut last = None;
    for caps in re.captures_iter(text) {
        last = Some(caps[1].to_string());
    }
    last.and_then(|candidate| serde_json::from_str(&candidate).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_trailing_json_object() {
        let stdout = "did some work\n{\"task_id\": \"t1\", \"run_id\": \"r1\", \"status\": \"completed\", \"summary\": \"ok\"}";
        let report = parse_worker_output(stdout).unwrap();
        assert_eq!(report.task_id, "t1");
        assert_eq!(report.status, "completed");
    }

    #[test]
    fn parses_result_wrapper_envelope() {
        let inner = "{\"task_id\": \"t1\", \"run_id\": \"r1\", \"status\": \"failed\", \"error\": \"boom\"}";
        let wrapper = serde_json::json!({ "result": inner }).to_string();
        let report = parse_worker_output(&wrapper).unwrap();
        assert_eq!(report.status, "failed");
        assert_eq!(report.error, "boom");
    }

    #[test]
    fn parses_fenced_json_block_taking_the_last_one() {
        let stdout = "```json\n{\"task_id\": \"t1\", \"run_id\": \"r1\", \"status\": \"blocked\", \"error\": \"first\"}\n```\nmore text\n```json\n{\"task_id\": \"t1\", \"run_id\": \"r1\", \"status\": \"blocked\", \"error\": \"second\"}\n```";
        let report = parse_worker_output(stdout).unwrap();
        assert_eq!(report.error, "second");
    }

    #[test]
    fn returns_none_for_unparseable_output() {
        assert!(parse_worker_output("no json here at all").is_none());
    }
}
