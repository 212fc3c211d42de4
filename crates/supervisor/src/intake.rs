//! Ingests Markdown requirement packets (`REQ_*.md`) from an inbox directory, converts
//! them into task seeds, and merges them into the store transactionally: a failed gate
//! check rolls the merge back instead of leaving a half-applied packet behind.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use regex::Regex;

use taskstore::domain::{StoreConfig, Task, TaskStore};
use taskstore::progress_log::ProgressLog;
use taskstore::storage::Store;

use crate::config::RuntimeConfig;
use crate::gate;
use crate::vcs;

#[derive(Debug, Clone, Default)]
pub struct TaskSeed {
    pub id: String,
    pub title: String,
    pub goal: String,
    pub acceptance: String,
    pub constraints: String,
    pub verification: String,
    pub scope: String,
    pub priority: String,
    pub depends_on: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RequirementPacket {
    pub req_id: String,
    pub title: String,
    pub project_requirements: String,
    pub config_updates: serde_json::Map<String, serde_json::Value>,
    pub seeds: Vec<TaskSeed>,
    pub source_path: PathBuf,
}

/// Lists `REQ_*.md` packets in `inbox_dir`, skipping `inbox/processed/` and any packet
/// whose own `## Status` section already reads `processed`, sorted by filename so
/// intake order is deterministic.
pub fn scan_inbox(inbox_dir: &Path) -> Result<Vec<PathBuf>> {
    let processed_dir = inbox_dir.join("processed");
    std::fs::create_dir_all(&processed_dir).ok();

    let mut found = Vec::new();
    if let Ok(entries) = std::fs::read_dir(inbox_dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                continue;
            }
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            if !name.starts_with("REQ_") || !name.ends_with(".md") {
                continue;
            }
            if let Ok(content) = std::fs::read_to_string(&path) {
                if section(&content, "Status").map(|s| s.trim().eq_ignore_ascii_case("processed")).unwrap_or(false) {
                    continue;
                }
            }
            found.push(path);
        }
    }
    found.sort();
    Ok(found)
}

fn section(content: &str, name: &str) -> Option<String> {
    let sections = split_sections(content);
    sections.get(name).cloned()
}

/// Splits a packet's body into named sections on `## ` headers.
fn split_sections(content: &str) -> HashMap<String, String> {
    let mut sections = HashMap::new();
    let mut current: Option<String> = None;
    let mut buf = String::new();

    for line in content.lines() {
        if let Some(title) = line.strip_prefix("## ") {
            if let Some(name) = current.take() {
                sections.insert(name, buf.trim().to_string());
            }
            current = Some(title.trim().to_string());
            buf = String::new();
        } else if current.is_some() {
            buf.push_str(line);
            buf.push('\n');
        }
    }
    if let Some(name) = current {
        sections.insert(name, buf.trim().to_string());
    }
    sections
}

fn extract_yaml_block(text: &str) -> String {
    let re = Regex::new(r"(?s)```ya?ml\s*\n(.*?)\n```").unwrap();
    re.captures(text)
        .map(|c| c[1].to_string())
        .unwrap_or_else(|| text.to_string())
}

/// Parses one `REQ_*.md` packet. Fails only on structural problems (no title);
/// missing sections just leave their field empty, and [`validate_req`] catches that.
pub fn parse_req(path: &Path) -> Result<RequirementPacket> {
    let content = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;

    let title_re = Regex::new(r"^#\s*(REQ_\w+):\s*(.+)").unwrap();
    let (req_id, title) = content
        .lines()
        .find_map(|line| title_re.captures(line))
        .map(|c| (c[1].to_string(), c[2].trim().to_string()))
        .ok_or_else(|| anyhow::anyhow!("{}: missing '# REQ_xxx: title' heading", path.display()))?;

    let sections = split_sections(&content);
    let project_requirements = sections.get("Project Requirements").cloned().unwrap_or_default();

    let config_updates = sections
        .get("Config")
        .map(|raw| {
            let yaml = extract_yaml_block(raw);
            serde_yaml::from_str::<serde_json::Map<String, serde_json::Value>>(&yaml).unwrap_or_default()
        })
        .unwrap_or_default();

    let seeds = sections.get("Task Seeds").map(|raw| parse_task_seeds(raw)).unwrap_or_default();

    Ok(RequirementPacket {
        req_id,
        title,
        project_requirements,
        config_updates,
        seeds,
        source_path: path.to_path_buf(),
    })
}

fn parse_task_seeds(body: &str) -> Vec<TaskSeed> {
    let header_re = Regex::new(r"^###\s*(\S+):\s*(.+)").unwrap();
    let mut seeds = Vec::new();
    let mut current: Option<TaskSeed> = None;

    for line in body.lines() {
        if let Some(caps) = header_re.captures(line) {
            if let Some(seed) = current.take() {
                seeds.push(seed);
            }
            current = Some(TaskSeed {
                id: caps[1].to_string(),
                title: caps[2].trim().to_string(),
                ..Default::default()
            });
            continue;
        }
        let Some(seed) = current.as_mut() else { continue };
        let trimmed = line.trim_start_matches('-').trim();
        let Some((key, value)) = trimmed.split_once(':') else { continue };
        let key = key.trim();
        let value = value.trim().to_string();
        match key {
            "goal" => seed.goal = value,
            "acceptance" => seed.acceptance = value,
            "constraints" => seed.constraints = value,
            "verification" => seed.verification = value,
            "scope" => seed.scope = value,
            "priority" => seed.priority = value,
            "depends_on" => {
                seed.depends_on = if let Ok(list) = serde_json::from_str::<Vec<String>>(&value) {
                    list
                } else {
                    value.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect()
                };
            }
            _ => {}
        }
    }
    if let Some(seed) = current {
        seeds.push(seed);
    }
    seeds
}

/// A packet is convertible if it names at least one seed that has both a goal and
/// acceptance criteria — everything else (constraints, scope, priority) is optional.
pub fn validate_req(req: &RequirementPacket) -> Result<()> {
    if req.req_id.is_empty() {
        bail!("packet has no req_id");
    }
    let has_complete_seed = req.seeds.iter().any(|s| !s.goal.is_empty() && !s.acceptance.is_empty());
    if !has_complete_seed {
        bail!("packet {} has no task seed with both a goal and acceptance criteria", req.req_id);
    }
    Ok(())
}

/// Appends a numeric suffix until `base_id` doesn't collide with `existing`, returning
/// the chosen id and, if it changed, a note explaining the remap.
pub fn generate_unique_task_id(base_id: &str, existing: &HashSet<String>) -> (String, Option<String>) {
    if !existing.contains(base_id) {
        return (base_id.to_string(), None);
    }
    let mut n = 1;
    loop {
        let candidate = format!("{base_id}-{n}");
        if !existing.contains(&candidate) {
            return (candidate.clone(), Some(format!("{base_id} -> {candidate} (id collision)")));
        }
        n += 1;
    }
}

pub fn merge_to_claude_md(project_requirements: &str, claude_md_path: &Path, now: chrono::DateTime<Utc>) -> Result<()> {
    if project_requirements.trim().is_empty() {
        return Ok(());
    }
    let heading_re = Regex::new(r"## Project Requirements\s*\n").unwrap();
    let existing = std::fs::read_to_string(claude_md_path).unwrap_or_default();

    let block = format!(
        "<!-- intake added {} -->\n{}\n<!-- end intake -->\n",
        now.to_rfc3339(),
        project_requirements.trim(),
    );

    let updated = if let Some(m) = heading_re.find(&existing) {
        let insert_at = m.end();
        format!("{}{}{}", &existing[..insert_at], block, &existing[insert_at..])
    } else {
        format!("{existing}\n## Project Requirements\n\n{block}")
    };

    std::fs::write(claude_md_path, updated).with_context(|| format!("failed to write {}", claude_md_path.display()))
}

fn convert_seeds_to_tasks(seeds: &[TaskSeed], existing_ids: &mut HashSet<String>, now: chrono::DateTime<Utc>) -> (Vec<Task>, Vec<String>) {
    let mut tasks = Vec::new();
    let mut id_notes = Vec::new();

    for seed in seeds {
        let (id, note) = generate_unique_task_id(&seed.id, existing_ids);
        existing_ids.insert(id.clone());
        if let Some(note) = note {
            id_notes.push(note);
        }

        let mut description = format!("{}\n\nGoal: {}\nAcceptance: {}", seed.title, seed.goal, seed.acceptance);
        if !seed.constraints.is_empty() {
            description.push_str(&format!("\nConstraints: {}", seed.constraints));
        }

        let mut notes_parts = Vec::new();
        if !seed.verification.is_empty() {
            notes_parts.push(format!("verification: {}", seed.verification));
        }
        if !seed.scope.is_empty() {
            notes_parts.push(format!("scope: {}", seed.scope));
        }
        if !seed.priority.is_empty() {
            notes_parts.push(format!("priority: {}", seed.priority));
        }

        let mut task = Task::new_pending(id, description, seed.depends_on.clone(), now);
        task.notes = notes_parts.join("; ");
        tasks.push(task);
    }

    (tasks, id_notes)
}

/// Assigns one intake config key into the store's typed config, falling through to the
/// catch-all `extra` map for keys this crate doesn't interpret directly — a plain insert
/// into `extra` would silently no-op for the named fields since they're not re-read from
/// it after deserialization.
fn apply_config_update(config: &mut StoreConfig, key: &str, value: &serde_json::Value) {
    match key {
        "lease_ttl_seconds" => {
            if let Some(v) = value.as_u64() {
                config.lease_ttl_seconds = v;
            }
        }
        "max_attempts" => {
            if let Some(v) = value.as_u64() {
                config.max_attempts = v as u32;
            }
        }
        "verify_required" => {
            if let Some(v) = value.as_bool() {
                config.verify_required = v;
            }
        }
        "verify_command" => {
            if let Some(v) = value.as_str() {
                config.verify_command = v.to_string();
            }
        }
        "retention_days" => {
            if let Some(v) = value.as_u64() {
                config.retention_days = v;
            }
        }
        "max_runs_mb" => {
            if let Some(v) = value.as_u64() {
                config.max_runs_mb = v;
            }
        }
        _ => {
            config.extra.insert(key.to_string(), value.clone());
        }
    }
}

pub struct IntakeOutcome {
    pub req_id: String,
    pub run_id: String,
    pub tasks_added: Vec<String>,
    pub status: &'static str,
}

/// The full transactional flow for one packet: parse, validate, snapshot, merge
/// CLAUDE.md + config + tasks, run the gate, commit on success or roll back to the
/// snapshot on failure, then archive the packet under `inbox/processed/`.
pub fn process_req(store: &Store, progress: &ProgressLog, config: &RuntimeConfig, path: &Path, run_id: &str) -> Result<IntakeOutcome> {
    let now = Utc::now();
    let req = match parse_req(path) {
        Ok(req) => req,
        Err(e) => {
            progress.log_intake_fail("unknown", run_id, &e.to_string(), now)?;
            bail!(e);
        }
    };

    if let Err(e) = validate_req(&req) {
        progress.log_intake_fail(&req.req_id, run_id, &e.to_string(), now)?;
        return Ok(IntakeOutcome {
            req_id: req.req_id,
            run_id: run_id.to_string(),
            tasks_added: Vec::new(),
            status: "blocked",
        });
    }

    progress.log_intake_start(&req.req_id, run_id, now)?;

    let snapshot = store.snapshot()?;
    let mut existing_ids = snapshot.existing_ids();
    let (new_tasks, _id_notes) = convert_seeds_to_tasks(&req.seeds, &mut existing_ids, now);
    let tasks_added: Vec<String> = new_tasks.iter().map(|t| t.id.clone()).collect();

    let claude_md_snapshot = std::fs::read_to_string(&config.claude_md).ok();
    merge_to_claude_md(&req.project_requirements, &config.claude_md, now)?;

    let merge_result: Result<TaskStore> = (|| {
        store.with_lock(|doc| {
            for (key, value) in &req.config_updates {
                apply_config_update(&mut doc.config, key, value);
            }
            doc.tasks.extend(new_tasks.clone());
            Ok(())
        })?;
        Ok(store.snapshot()?)
    })();

    let merged = match merge_result {
        Ok(doc) => doc,
        Err(e) => {
            progress.log_intake_fail(&req.req_id, run_id, &e.to_string(), now)?;
            return Err(e);
        }
    };

    let gate_result = gate::run_gate_checks(&merged, &config.progress_file, &config.runs_dir, &config.verify_command, config.task_file.parent().unwrap_or(Path::new(".")))?;

    if gate_result.exit_code != 0 {
        store.restore(&snapshot)?;
        restore_claude_md(&config.claude_md, claude_md_snapshot.as_deref());
        progress.log_intake_fail(&req.req_id, run_id, &format!("gate check failed ({}): {}", gate_result.command, gate_result.evidence), now)?;
        return Ok(IntakeOutcome {
            req_id: req.req_id,
            run_id: run_id.to_string(),
            tasks_added: Vec::new(),
            status: "blocked",
        });
    }

    let repo_dir = config.task_file.parent().unwrap_or(Path::new("."));
    let commit = vcs::commit_intake(repo_dir, &req.req_id, &tasks_added).ok();

    mark_processed(path)?;

    progress.log_intake_complete(
        &req.req_id,
        run_id,
        &tasks_added,
        !req.config_updates.is_empty(),
        &taskstore::domain::VerifyResult {
            command: gate_result.command,
            exit_code: gate_result.exit_code,
            evidence: gate_result.evidence,
        },
        commit
            .as_ref()
            .map(|c| taskstore::domain::GitResult { commit: c.commit.clone(), branch: c.branch.clone() })
            .as_ref(),
        now,
    )?;

    Ok(IntakeOutcome {
        req_id: req.req_id,
        run_id: run_id.to_string(),
        tasks_added,
        status: "completed",
    })
}

/// Reverts `CLAUDE.md` to its pre-merge contents on a gate failure, best-effort: a
/// write error here must not mask the gate failure that triggered the rollback.
/// `before` is `None` when the file didn't exist prior to the merge, in which case the
/// merge-created file is removed instead of overwritten.
fn restore_claude_md(claude_md_path: &Path, before: Option<&str>) {
    match before {
        Some(text) => {
            let _ = std::fs::write(claude_md_path, text);
        }
        None => {
            let _ = std::fs::remove_file(claude_md_path);
        }
    }
}

fn mark_processed(path: &Path) -> Result<()> {
    let processed_dir = path.parent().unwrap_or(Path::new(".")).join("processed");
    std::fs::create_dir_all(&processed_dir)?;
    let dest = processed_dir.join(path.file_name().unwrap());
    std::fs::rename(path, dest)?;
    Ok(())
}
