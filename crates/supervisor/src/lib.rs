//! Drives the durable task store: selects and claims tasks, invokes the worker
//! subprocess, adjudicates its report, and runs the intake pipeline for new
//! requirement packets.

pub mod cli;
pub mod config;
pub mod exec;
pub mod gate;
pub mod housekeeping;
pub mod intake;
pub mod output;
pub mod prompt;
pub mod supervisor;
pub mod vcs;
pub mod worker;

pub use config::{ConfigOverrides, RuntimeConfig};
pub use output::OutputContext;
pub use supervisor::{Supervisor, StopReason};
pub use worker::WorkerInvoker;
