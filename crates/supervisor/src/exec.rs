//! Shell-command execution with a hard wall-clock timeout. Shared by the worker
//! invoker (running the agent) and the gate checks (schema validator, secrets
//! scanner, verify script).

use std::collections::HashMap;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

/// Runs `command` through the platform shell, capturing stdout/stderr, killing it if
/// it doesn't finish within `timeout`.
pub fn run_with_timeout(
    command: &str,
    timeout: Duration,
    env: &HashMap<String, String>,
    working_dir: &Path,
) -> Result<CommandOutput> {
    #[cfg(unix)]
    let mut cmd = {
        let mut c = Command::new("sh");
        c.arg("-c").arg(command);
        c
    };

    #[cfg(windows)]
    let mut cmd = {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(command);
        c
    };

    cmd.current_dir(working_dir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    for (key, value) in env {
        cmd.env(key, value);
    }

    let mut child = cmd.spawn().with_context(|| format!("failed to spawn: {command}"))?;
    let timed_out = wait_with_timeout(&mut child, timeout)?;
    let output = child.wait_with_output().context("failed to collect command output")?;

    Ok(CommandOutput {
        exit_code: if timed_out { None } else { output.status.code() },
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        timed_out,
    })
}

fn wait_with_timeout(child: &mut Child, timeout: Duration) -> Result<bool> {
    let start = Instant::now();
    loop {
        match child.try_wait()? {
            Some(_status) => return Ok(false),
            None => {
                if start.elapsed() >= timeout {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Ok(true);
                }
                std::thread::sleep(Duration::from_millis(100));
            }
        }
    }
}

pub fn git_commit(working_dir: &Path) -> Option<String> {
    Command::new("git")
        .arg("rev-parse")
        .arg("HEAD")
        .current_dir(working_dir)
        .output()
        .ok()
        .and_then(|o| o.status.success().then(|| String::from_utf8_lossy(&o.stdout).trim().to_string()))
}

pub fn git_branch(working_dir: &Path) -> Option<String> {
    Command::new("git")
        .arg("rev-parse")
        .arg("--abbrev-ref")
        .arg("HEAD")
        .current_dir(working_dir)
        .output()
        .ok()
        .and_then(|o| o.status.success().then(|| String::from_utf8_lossy(&o.stdout).trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_with_timeout_captures_success() {
        let out = run_with_timeout("echo hello", Duration::from_secs(5), &HashMap::new(), Path::new(".")).unwrap();
        assert_eq!(out.exit_code, Some(0));
        assert!(out.stdout.contains("hello"));
    }

    #[test]
    fn run_with_timeout_captures_failure() {
        let out = run_with_timeout("exit 3", Duration::from_secs(5), &HashMap::new(), Path::new(".")).unwrap();
        assert_eq!(out.exit_code, Some(3));
    }

    #[test]
    fn run_with_timeout_kills_long_running_command() {
        let out = run_with_timeout("sleep 10", Duration::from_millis(200), &HashMap::new(), Path::new(".")).unwrap();
        assert!(out.timed_out);
        assert_eq!(out.exit_code, None);
    }

    #[test]
    fn git_helpers_degrade_gracefully_outside_repo() {
        let dir = std::env::temp_dir();
        // Either value is acceptable: the temp dir may itself sit inside a repo in CI.
        let _ = git_commit(&dir);
        let _ = git_branch(&dir);
    }
}
