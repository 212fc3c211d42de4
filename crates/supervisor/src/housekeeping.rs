//! On-demand maintenance: archive pruning (`--cleanup`) and the Markdown status
//! board (`--report`). Neither runs as part of the per-iteration loop.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use taskstore::domain::{TaskStatus, TaskStore};

pub struct CleanupReport {
    pub deleted_for_age: usize,
    pub deleted_for_size: usize,
    pub remaining_bytes: u64,
}

/// Deletes archives older than `retention_days`, then, if the directory is still over
/// `max_runs_mb`, deletes oldest-first until it fits. Missing files racing a concurrent
/// deletion are ignored rather than treated as errors.
pub fn cleanup_runs(runs_dir: &Path, retention_days: u64, max_runs_mb: u64, now: DateTime<Utc>) -> Result<CleanupReport> {
    if !runs_dir.is_dir() {
        return Ok(CleanupReport { deleted_for_age: 0, deleted_for_size: 0, remaining_bytes: 0 });
    }

    let cutoff = now - chrono::Duration::days(retention_days as i64);
    let mut entries: Vec<(std::path::PathBuf, u64, DateTime<Utc>)> = Vec::new();
    let mut deleted_for_age = 0usize;

    for entry in fs::read_dir(runs_dir).with_context(|| format!("reading {}", runs_dir.display()))? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(_) => continue,
        };
        let modified: DateTime<Utc> = metadata.modified().map(DateTime::<Utc>::from).unwrap_or(now);
        if modified < cutoff {
            if fs::remove_file(&path).is_ok() {
                deleted_for_age += 1;
            }
            continue;
        }
        entries.push((path, metadata.len(), modified));
    }

    entries.sort_by_key(|(_, _, modified)| *modified);

    let budget_bytes = max_runs_mb.saturating_mul(1024 * 1024);
    let mut total: u64 = entries.iter().map(|(_, size, _)| size).sum();
    let mut deleted_for_size = 0usize;

    let mut i = 0;
    while total > budget_bytes && i < entries.len() {
        let (path, size, _) = &entries[i];
        if fs::remove_file(path).is_ok() {
            total = total.saturating_sub(*size);
            deleted_for_size += 1;
        }
        i += 1;
    }

    Ok(CleanupReport { deleted_for_age, deleted_for_size, remaining_bytes: total })
}

/// Renders the Markdown status board: counts by status, blocked tasks with their notes,
/// the most recent archives, and the archive directory's disk usage.
pub fn render_report(store: &TaskStore, runs_dir: &Path, now: DateTime<Utc>) -> Result<String> {
    let stats = store.stats();
    let mut out = String::new();
    out.push_str(&format!("# Supervisor status\n\nGenerated {}\n\n", now.to_rfc3339()));

    out.push_str("## Task counts\n\n");
    for (status, count) in &stats {
        out.push_str(&format!("- {status}: {count}\n"));
    }

    let blocked: Vec<_> = store.tasks.iter().filter(|t| t.status == TaskStatus::Blocked).collect();
    out.push_str("\n## Blocked tasks\n\n");
    if blocked.is_empty() {
        out.push_str("_none_\n");
    } else {
        for task in blocked {
            out.push_str(&format!("- **{}**: {}\n", task.id, task.notes));
        }
    }

    out.push_str("\n## Recent archives\n\n");
    let mut archives: Vec<(std::path::PathBuf, DateTime<Utc>)> = Vec::new();
    let mut total_bytes: u64 = 0;
    if runs_dir.is_dir() {
        for entry in fs::read_dir(runs_dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            if let Ok(metadata) = entry.metadata() {
                total_bytes += metadata.len();
                let modified = metadata.modified().map(DateTime::<Utc>::from).unwrap_or(now);
                archives.push((path, modified));
            }
        }
    }
    archives.sort_by_key(|(_, modified)| std::cmp::Reverse(*modified));
    if archives.is_empty() {
        out.push_str("_none_\n");
    } else {
        for (path, modified) in archives.iter().take(10) {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("?");
            out.push_str(&format!("- {name} ({})\n", modified.to_rfc3339()));
        }
    }

    out.push_str(&format!("\nArchive directory size: {:.2} MB\n", total_bytes as f64 / (1024.0 * 1024.0)));

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskstore::domain::Task;

    #[test]
    fn cleanup_on_missing_dir_is_a_noop() {
        let report = cleanup_runs(Path::new("/nonexistent/runs/dir"), 7, 100, Utc::now()).unwrap();
        assert_eq!(report.deleted_for_age, 0);
        assert_eq!(report.deleted_for_size, 0);
    }

    #[test]
    fn report_lists_blocked_tasks_and_counts() {
        let now = Utc::now();
        let mut store = TaskStore::new(now);
        let mut blocked = Task::new_pending("T1", "do a thing", vec![], now);
        blocked.status = TaskStatus::Blocked;
        blocked.notes = "waiting on a human".to_string();
        store.tasks.push(blocked);

        let dir = tempfile::tempdir().unwrap();
        let rendered = render_report(&store, dir.path(), now).unwrap();
        assert!(rendered.contains("blocked: 1"));
        assert!(rendered.contains("waiting on a human"));
    }
}
