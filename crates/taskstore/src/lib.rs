//! Durable, crash-safe task store: the document model, state machine, scheduler,
//! and progress log underneath the supervisor.
//!
//! This crate has no subprocess, prompt, or CLI concerns — see the `supervisor`
//! crate for those. Everything here is either pure data (`domain`), pure functions
//! over that data (`state_machine`, `scheduler`), or a thin, lock-guarded I/O layer
//! (`storage`, `progress_log`).

pub mod domain;
pub mod errors;
pub mod progress_log;
pub mod scheduler;
pub mod state_machine;
pub mod storage;

pub use domain::{Task, TaskStatus, TaskStore};
pub use errors::{ActionableError, StoreError};
pub use progress_log::ProgressLog;
pub use storage::Store;
