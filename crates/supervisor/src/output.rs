//! Manual ANSI-coded console output. No `tracing`/`log`: the progress log already
//! covers durable, structured events, so this layer exists purely for the operator
//! watching a terminal.

use std::fmt::Display;

mod colors {
    pub const BLUE: &str = "\x1b[34m";
    pub const GREEN: &str = "\x1b[32m";
    pub const YELLOW: &str = "\x1b[33m";
    pub const RED: &str = "\x1b[31m";
    pub const BOLD: &str = "\x1b[1m";
    pub const RESET: &str = "\x1b[0m";
}

pub enum Level {
    Info,
    Success,
    Warning,
    Error,
}

pub struct OutputContext {
    quiet: bool,
    json: bool,
}

impl OutputContext {
    pub fn new(quiet: bool, json: bool) -> Self {
        Self { quiet, json }
    }

    pub fn is_json(&self) -> bool {
        self.json
    }

    pub fn log(&self, level: Level, msg: impl Display) {
        if self.json || (self.quiet && !matches!(level, Level::Error)) {
            return;
        }
        let (color, label) = match level {
            Level::Info => (colors::BLUE, "INFO"),
            Level::Success => (colors::GREEN, "OK"),
            Level::Warning => (colors::YELLOW, "WARN"),
            Level::Error => (colors::RED, "ERROR"),
        };
        let line = format!("{color}{}[{label}]{} {msg}", colors::BOLD, colors::RESET);
        if matches!(level, Level::Error) {
            eprintln!("{line}");
        } else {
            println!("{line}");
        }
    }

    pub fn print_json(&self, value: &serde_json::Value) {
        println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
    }
}
