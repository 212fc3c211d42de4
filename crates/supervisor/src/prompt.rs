//! Builds the prompts handed to the worker subprocess. Every prompt binds the worker
//! to a `task_id`/`run_id` pair and spells out the exact JSON it must print on exit,
//! since that's the only channel back to the supervisor.

/// The prompt for a normal task attempt.
pub fn build_task_prompt(
    task_id: &str,
    run_id: &str,
    description: &str,
    depends_on: &[String],
    attempt: u32,
    max_attempts: u32,
    verify_command: &str,
) -> String {
    let deps = if depends_on.is_empty() {
        "none".to_string()
    } else {
        depends_on.join(", ")
    };

    format!(
        "You are working on a single task from a durable task queue. Follow these rules exactly.\n\
\n\
1. You are bound to task_id=\"{task_id}\" and run_id=\"{run_id}\". Only report on this task;\n\
   never claim, complete, fail, or block any other task.\n\
2. Do not edit Task.json directly. Status, claim, and result fields are owned by the\n\
   supervisor; report your outcome as JSON on stdout instead (format below).\n\
3. This is attempt {attempt} of {max_attempts}.\n\
4. Dependencies already completed: {deps}.\n\
5. The verification command is `{verify_command}`. Your work is only \"completed\" if this\n\
   command exits 0 after your changes.\n\
\n\
Task description:\n\
{description}\n\
\n\
Checklist:\n\
  1. Read the task description and any referenced files.\n\
  2. Make the minimal change that satisfies the description.\n\
  3. Run the verification command yourself and read its output.\n\
  4. If it passes, summarize what changed.\n\
  5. If it fails and you can fix it, fix it and re-verify.\n\
  6. If you cannot complete the task, decide whether it's a retryable failure or needs a\n\
     human decision (blocked).\n\
  7. Print exactly one JSON object as your final output, one of:\n\
\n\
     {{\"task_id\": \"{task_id}\", \"run_id\": \"{run_id}\", \"status\": \"completed\", \"summary\": \"...\",\n\
      \"verify\": {{\"command\": \"{verify_command}\", \"exit_code\": 0, \"evidence\": \"...\"}}}}\n\
     {{\"task_id\": \"{task_id}\", \"run_id\": \"{run_id}\", \"status\": \"failed\", \"error\": \"...\"}}\n\
     {{\"task_id\": \"{task_id}\", \"run_id\": \"{run_id}\", \"status\": \"blocked\", \"error\": \"...\"}}\n"
    )
}

/// The prompt used for an ad hoc `--status` / health-check invocation of the worker.
pub fn build_status_check_prompt() -> String {
    "Report your current status. Print a single line: \"OK\" if you are ready to accept \
work, or a short reason why not."
        .to_string()
}

/// The prompt used to ask the worker to diagnose a task that failed without a parseable
/// result, before the supervisor decides whether to retry it.
pub fn build_recovery_prompt(task_id: &str, run_id: &str, error: &str) -> String {
    format!(
        "Task {task_id} (run_id={run_id}) failed with the following error:\n\n{error}\n\n\
Diagnose the root cause and state, in one paragraph, whether this looks retryable (a \
transient or fixable problem) or needs a human decision (an ambiguous or missing \
requirement). Do not attempt to fix anything; just diagnose."
    )
}

/// Prompt for the subprocess-delegated intake variant, where the worker itself reads a
/// requirement packet and proposes task seeds, rather than the supervisor's in-process
/// parser (see [`crate::intake`]) doing it.
pub fn build_intake_prompt(req_id: &str, run_id: &str, req_content: &str, task_json_path: &str, claude_md_path: &str) -> String {
    format!(
        "You are processing intake packet {req_id} (run_id={run_id}).\n\
\n\
Packet contents:\n\
{req_content}\n\
\n\
Propose the task seeds this packet implies. Do not write to {task_json_path} yourself —\n\
print the seeds as JSON so the supervisor's intake pipeline can merge them in. If the\n\
packet contains project requirements prose that belongs in {claude_md_path}, include it\n\
under a \"project_requirements\" key."
    )
}

/// Prompt asking the worker to sanity-check a packet before the supervisor attempts to
/// parse it in-process — used when plain structural validation isn't enough to catch
/// ambiguous or contradictory requirements.
pub fn build_intake_validation_prompt(req_content: &str) -> String {
    format!(
        "Review this intake packet for ambiguity, missing acceptance criteria, or internal\n\
contradictions before it is converted into tasks:\n\n{req_content}\n\n\
Reply \"VALID\" if it's ready to convert, or list the specific problems otherwise."
    )
}
