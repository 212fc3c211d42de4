//! Commits an intake merge (`Task.json` + `CLAUDE.md`) once its gate checks pass.
//! Degrades gracefully outside a git repository, same as the rest of this crate's git
//! touchpoints.

use std::path::Path;

pub struct CommitOutcome {
    pub commit: String,
    pub branch: String,
}

/// Stages `Task.json` and `CLAUDE.md` and commits them with a message naming the
/// intake packet and the tasks it added. Returns `commit: "no-change"` if nothing was
/// staged (the packet only touched config the store already had).
pub fn commit_intake(repo_dir: &Path, req_id: &str, tasks_added: &[String]) -> anyhow::Result<CommitOutcome> {
    let repo = git2::Repository::open(repo_dir)?;
    let branch = current_branch(&repo).unwrap_or_else(|| "main".to_string());

    let mut index = repo.index()?;
    for rel in ["Task.json", "CLAUDE.md"] {
        if repo_dir.join(rel).exists() {
            index.add_path(Path::new(rel))?;
        }
    }
    let tree_oid = index.write_tree()?;
    index.write()?;

    let head_commit = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
    if let Some(parent) = &head_commit {
        if parent.tree_id() == tree_oid {
            return Ok(CommitOutcome {
                commit: "no-change".to_string(),
                branch,
            });
        }
    }

    let tree = repo.find_tree(tree_oid)?;
    let signature = repo.signature().unwrap_or_else(|_| {
        git2::Signature::now("supervisor", "supervisor@localhost").expect("fallback signature is always valid")
    });

    let message = commit_message(req_id, tasks_added);
    let parents: Vec<&git2::Commit> = head_commit.iter().collect();
    let commit_oid = repo.commit(Some("HEAD"), &signature, &signature, &message, &tree, &parents)?;

    Ok(CommitOutcome {
        commit: short_oid(&commit_oid),
        branch,
    })
}

fn current_branch(repo: &git2::Repository) -> Option<String> {
    repo.head()
        .ok()
        .and_then(|h| h.shorthand().map(|s| s.to_string()))
}

fn short_oid(oid: &git2::Oid) -> String {
    oid.to_string()[..7.min(oid.to_string().len())].to_string()
}

/// Concatenates the staged and unstaged diff text, for the secrets scanner to sweep
/// before a commit goes through. Returns `None` outside a git repository.
pub fn pending_diff_text(repo_dir: &Path) -> Option<String> {
    let repo = git2::Repository::open(repo_dir).ok()?;
    let mut text = String::new();

    if let Ok(head_tree) = repo.head().and_then(|h| h.peel_to_tree()) {
        if let Ok(diff) = repo.diff_tree_to_index(Some(&head_tree), None, None) {
            append_diff(&diff, &mut text);
        }
    }
    if let Ok(diff) = repo.diff_index_to_workdir(None, None) {
        append_diff(&diff, &mut text);
    }

    Some(text)
}

fn append_diff(diff: &git2::Diff, out: &mut String) {
    let _ = diff.print(git2::DiffFormat::Patch, |_, _, line| {
        if let Ok(s) = std::str::from_utf8(line.content()) {
            out.push_str(s);
        }
        true
    });
}

fn commit_message(req_id: &str, tasks_added: &[String]) -> String {
    let tasks_str = if tasks_added.len() > 5 {
        format!("{} (+{} more)", tasks_added[..5].join(", "), tasks_added.len() - 5)
    } else {
        tasks_added.join(", ")
    };
    format!("feat(intake): process {req_id}, add {} tasks [{tasks_str}]", tasks_added.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_message_truncates_long_task_lists() {
        let tasks: Vec<String> = (0..8).map(|i| format!("t{i}")).collect();
        let msg = commit_message("REQ_001", &tasks);
        assert!(msg.contains("+3 more"));
        assert!(msg.contains("add 8 tasks"));
    }
}
