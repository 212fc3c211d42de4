use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use supervisor::cli::Cli;
use supervisor::config::{ConfigOverrides, RuntimeConfig};
use supervisor::output::OutputContext;
use supervisor::worker::WorkerInvoker;
use supervisor::{housekeeping, intake, Supervisor};
use taskstore::progress_log::ProgressLog;
use taskstore::storage::Store;

fn main() -> Result<()> {
    let cli = Cli::parse();
    let out = OutputContext::new(!cli.verbose && !cli.status, cli.json);

    let base_dir = cli.base_dir.canonicalize().unwrap_or(cli.base_dir.clone());
    let task_file = base_dir.join("Task.json");
    let store = Store::new(&task_file, Duration::from_secs(5));

    let store_config = store.snapshot().context("failed to read Task.json")?.config;
    let mut config = RuntimeConfig::from_store_config(&base_dir, &store_config);

    ConfigOverrides {
        max_turns: cli.max_turns,
        timeout_seconds: cli.timeout,
        lease_ttl_seconds: cli.lease_ttl,
        max_attempts: None,
        verify_command: None,
    }
    .apply(&mut config);

    let progress = ProgressLog::new(&config.progress_file);

    if cli.status {
        let worker = WorkerInvoker {
            binary: WorkerInvoker::resolve_binary(&config.worker_binary),
            max_turns: config.max_turns,
            timeout: config.worker_timeout,
            runs_dir: config.runs_dir.clone(),
            working_dir: base_dir.clone(),
        };
        let sup = Supervisor::new(store, progress, config, worker);
        return sup.show_status(&out);
    }

    if cli.reclaim {
        let worker = WorkerInvoker {
            binary: WorkerInvoker::resolve_binary(&config.worker_binary),
            max_turns: config.max_turns,
            timeout: config.worker_timeout,
            runs_dir: config.runs_dir.clone(),
            working_dir: base_dir.clone(),
        };
        let sup = Supervisor::new(store, progress, config, worker);
        sup.reclaim_expired_and_report(&out)?;
        return Ok(());
    }

    if cli.cleanup {
        let report = housekeeping::cleanup_runs(&config.runs_dir, config.retention_days, config.max_runs_mb, chrono::Utc::now())?;
        out.log(
            supervisor::output::Level::Info,
            format!(
                "cleanup: removed {} aged-out, {} over budget; {:.2} MB remaining",
                report.deleted_for_age,
                report.deleted_for_size,
                report.remaining_bytes as f64 / (1024.0 * 1024.0)
            ),
        );
        return Ok(());
    }

    if cli.report {
        let snapshot = store.snapshot().context("failed to read Task.json")?;
        let rendered = housekeeping::render_report(&snapshot, &config.runs_dir, chrono::Utc::now())?;
        std::fs::write(&config.status_file, &rendered).context("failed to write status.md")?;
        out.log(supervisor::output::Level::Success, format!("wrote {}", config.status_file.display()));
        return Ok(());
    }

    if cli.intake {
        let packets = intake::scan_inbox(&config.inbox_dir)?;
        if packets.is_empty() {
            out.log(supervisor::output::Level::Info, "no pending requirement packets");
            return Ok(());
        }
        for path in packets {
            let run_id = taskstore::state_machine::generate_run_id(chrono::Utc::now());
            match intake::process_req(&store, &progress, &config, &path, &run_id) {
                Ok(outcome) => out.log(
                    supervisor::output::Level::Success,
                    format!("{}: {} ({} tasks added)", outcome.req_id, outcome.status, outcome.tasks_added.len()),
                ),
                Err(e) => out.log(supervisor::output::Level::Error, format!("{}: {e}", path.display())),
            }
        }
        return Ok(());
    }

    let worker = WorkerInvoker {
        binary: WorkerInvoker::resolve_binary(&config.worker_binary),
        max_turns: config.max_turns,
        timeout: config.worker_timeout,
        runs_dir: config.runs_dir.clone(),
        working_dir: base_dir.clone(),
    };
    let sup = Supervisor::new(store, progress, config, worker);

    if cli.dry_run {
        let snapshot = sup.store.snapshot()?;
        let now = chrono::Utc::now();
        match taskstore::scheduler::select_next(&snapshot.tasks, now) {
            Some(task) => out.log(supervisor::output::Level::Info, format!("would claim: {} - {}", task.id, task.description)),
            None => out.log(supervisor::output::Level::Info, "no eligible task"),
        }
        return Ok(());
    }

    let stop_reason = if cli.r#loop {
        sup.run_loop(&out, cli.count)?
    } else {
        sup.execute_one_task(&out)?;
        return Ok(());
    };

    use supervisor::StopReason::*;
    match stop_reason {
        StopFile => out.log(supervisor::output::Level::Warning, "stopped: STOP file detected"),
        PauseFile => out.log(supervisor::output::Level::Warning, "stopped: paused"),
        BlockedTasks => out.log(supervisor::output::Level::Warning, "stopped: blocked tasks exist"),
        CircuitBreaker => out.log(supervisor::output::Level::Error, "stopped: circuit breaker tripped"),
        NoMoreWork => out.log(supervisor::output::Level::Info, "stopped: no more eligible work"),
        CountReached => out.log(supervisor::output::Level::Info, "stopped: requested count reached"),
    }

    Ok(())
}
