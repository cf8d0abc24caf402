/// GDB commands
///
/// This module defines the command model the engine queues and
/// correlates with GDB's answers, the cookie counter used to tag
/// commands, and builders for the MI commands the engine issues.

use serde::Serialize;
use std::sync::Mutex;

use crate::types::{quote, Output};

pub const LOAD_PROGRAM: &str = "load-program";
pub const SET_ARGS: &str = "set-args";
pub const ATTACH_TO_PROCESS: &str = "attach-to-process";
pub const ENABLE_PENDING_BREAKPOINTS: &str = "enable-pending-breakpoints";
pub const SET_BREAKPOINT: &str = "set-breakpoint";
pub const DELETE_BREAKPOINT: &str = "delete-breakpoint";
pub const LIST_BREAKPOINTS: &str = "list-breakpoints";
pub const RUN: &str = "run";
pub const CONTINUE: &str = "continue";
pub const STEP_INTO: &str = "step-into";
pub const STEP_OVER: &str = "step-over";
pub const STEP_OUT: &str = "step-out";
pub const RUN_TO: &str = "run-to";
pub const LIST_FRAMES: &str = "list-frames";
pub const LIST_FRAMES_ARGUMENTS: &str = "list-frames-arguments";
pub const LIST_LOCAL_VARIABLES: &str = "list-local-variables";
pub const EVALUATE_EXPRESSION: &str = "evaluate-expression";
pub const LIST_THREADS: &str = "list-threads";
pub const SELECT_THREAD: &str = "select-thread";
pub const LIST_FILES: &str = "list-files";
pub const LIST_REGISTER_NAMES: &str = "list-register-names";
pub const LIST_CHANGED_REGISTERS: &str = "list-changed-registers";
pub const LIST_REGISTER_VALUES: &str = "list-register-values";
pub const READ_MEMORY: &str = "read-memory";
pub const EXIT_ENGINE: &str = "exit-engine";

/// `path:line`, quoted when the path would otherwise split the command
fn location(path: &str, line: u32) -> String {
    let location = format!("{}:{}", path, line);
    if path.contains(|c: char| c.is_whitespace() || c == '"') {
        quote(&location)
    } else {
        location
    }
}

/// A command sent to GDB, with the bookkeeping needed to interpret its
/// answer
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Command {
    /// The line written to GDB, without the trailing newline
    pub text: String,
    /// Semantic name used by the output handlers, e.g. `delete-breakpoint`
    pub name: Option<String>,
    /// Positional arguments the handlers need back, e.g. the breakpoint number
    pub tags: Vec<String>,
    /// Opaque identifier handed back to the caller in the matching events
    pub cookie: Option<String>,
    /// The expression a `value=` answer belongs to
    pub variable: Option<String>,
}

impl Command {
    pub fn new(text: impl Into<String>) -> Self {
        Command {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn named(name: &str, text: impl Into<String>) -> Self {
        Command {
            name: Some(name.to_string()),
            ..Command::new(text)
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.cookie = Some(cookie.into());
        self
    }

    pub fn with_variable(mut self, variable: impl Into<String>) -> Self {
        self.variable = Some(variable.into());
        self
    }

    pub fn has_name(&self, name: &str) -> bool {
        self.name.as_deref() == Some(name)
    }

    pub fn tag(&self, index: usize) -> Option<&str> {
        self.tags.get(index).map(String::as_str)
    }

    /// Breakpoint numbers a `-break-delete` removes, whether built by
    /// [`Command::delete_breakpoint`] or typed
    pub fn deleted_breakpoints(&self) -> Vec<u32> {
        let mut words = self.text.split_whitespace();
        match words.next() {
            Some(word) if word.trim_start_matches(|c: char| c.is_ascii_digit()) == "-break-delete" => {
                words.filter_map(|w| w.parse().ok()).collect()
            }
            _ => Vec::new(),
        }
    }

    /// Load executable file
    pub fn load_program(path: &str) -> Self {
        Command::named(LOAD_PROGRAM, format!("-file-exec-and-symbols {}", quote(path)))
    }

    pub fn set_args(args: &[String]) -> Self {
        Command::named(SET_ARGS, format!("set args {}", args.join(" ")).trim_end().to_string())
    }

    pub fn attach_to_process(pid: u32) -> Self {
        Command::named(ATTACH_TO_PROCESS, format!("attach {}", pid))
    }

    pub fn enable_pending_breakpoints() -> Self {
        Command::named(ENABLE_PENDING_BREAKPOINTS, "set breakpoint pending auto")
    }

    /// Set a breakpoint at `path:line`, optionally conditional
    pub fn set_breakpoint(path: &str, line: u32, condition: Option<&str>, ignore_count: u32) -> Self {
        let mut text = String::from("-break-insert");
        if let Some(condition) = condition.filter(|c| !c.is_empty()) {
            text.push_str(&format!(" -c {}", quote(condition)));
        }
        if ignore_count > 0 {
            text.push_str(&format!(" -i {}", ignore_count));
        }
        text.push_str(&format!(" {}", location(path, line)));
        Command::named(SET_BREAKPOINT, text)
    }

    pub fn set_breakpoint_at_function(function: &str) -> Self {
        Command::named(SET_BREAKPOINT, format!("-break-insert {}", function))
    }

    /// CLI form of a line breakpoint; GDB answers with the overloads
    /// menu on ambiguous locations
    pub fn set_legacy_breakpoint(path: &str, line: u32) -> Self {
        Command::named(SET_BREAKPOINT, format!("break {}:{}", path, line))
    }

    pub fn delete_breakpoint(number: u32) -> Self {
        Command::named(DELETE_BREAKPOINT, format!("-break-delete {}", number)).with_tag(number.to_string())
    }

    pub fn list_breakpoints() -> Self {
        Command::named(LIST_BREAKPOINTS, "-break-list")
    }

    pub fn run() -> Self {
        Command::named(RUN, "-exec-run")
    }

    pub fn continue_execution() -> Self {
        Command::named(CONTINUE, "-exec-continue")
    }

    pub fn step_into() -> Self {
        Command::named(STEP_INTO, "-exec-step")
    }

    pub fn step_over() -> Self {
        Command::named(STEP_OVER, "-exec-next")
    }

    pub fn step_out() -> Self {
        Command::named(STEP_OUT, "-exec-finish")
    }

    pub fn run_to(path: &str, line: u32) -> Self {
        Command::named(RUN_TO, format!("-exec-until {}", location(path, line)))
    }

    /// Get stack frames, optionally limited to `low..=high`
    pub fn list_frames(range: Option<(u32, u32)>) -> Self {
        let text = match range {
            Some((low, high)) => format!("-stack-list-frames {} {}", low, high),
            None => "-stack-list-frames".to_string(),
        };
        Command::named(LIST_FRAMES, text)
    }

    pub fn list_frames_arguments(range: Option<(u32, u32)>) -> Self {
        let text = match range {
            Some((low, high)) => format!("-stack-list-arguments 1 {} {}", low, high),
            None => "-stack-list-arguments 1".to_string(),
        };
        Command::named(LIST_FRAMES_ARGUMENTS, text)
    }

    pub fn list_local_variables() -> Self {
        Command::named(LIST_LOCAL_VARIABLES, "-stack-list-locals 1")
    }

    pub fn evaluate_expression(expression: &str) -> Self {
        Command::named(
            EVALUATE_EXPRESSION,
            format!("-data-evaluate-expression {}", quote(expression)),
        )
        .with_variable(expression)
    }

    pub fn list_threads() -> Self {
        Command::named(LIST_THREADS, "-thread-list-ids")
    }

    pub fn select_thread(thread_id: u32) -> Self {
        Command::named(SELECT_THREAD, format!("-thread-select {}", thread_id)).with_tag(thread_id.to_string())
    }

    pub fn list_files() -> Self {
        Command::named(LIST_FILES, "-file-list-exec-source-files")
    }

    pub fn list_register_names() -> Self {
        Command::named(LIST_REGISTER_NAMES, "-data-list-register-names")
    }

    pub fn list_changed_registers() -> Self {
        Command::named(LIST_CHANGED_REGISTERS, "-data-list-changed-registers")
    }

    /// Register values in hexadecimal
    pub fn list_register_values() -> Self {
        Command::named(LIST_REGISTER_VALUES, "-data-list-register-values x")
    }

    /// Read `count` bytes starting at `address`, one byte per word
    pub fn read_memory(address: u64, count: usize) -> Self {
        Command::named(
            READ_MEMORY,
            format!("-data-read-memory 0x{:x} x 1 1 {}", address, count),
        )
    }

    pub fn exit_engine() -> Self {
        Command::named(EXIT_ENGINE, "-gdb-exit")
    }
}

/// An output paired with the command that produced it. Outputs that
/// carry no result record (async stops, stream text) have no command.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CommandAndOutput {
    pub command: Option<Command>,
    pub output: Output,
}

impl CommandAndOutput {
    pub fn new(command: Option<Command>, output: Output) -> Self {
        Self { command, output }
    }

    pub fn has_command(&self) -> bool {
        self.command.is_some()
    }

    pub fn command_name(&self) -> Option<&str> {
        self.command.as_ref().and_then(|c| c.name.as_deref())
    }

    pub fn cookie(&self) -> Option<String> {
        self.command.as_ref().and_then(|c| c.cookie.clone())
    }
}

/// Monotonically increasing source of command cookies, shared by every
/// engine it is handed to
#[derive(Debug, Default)]
pub struct SequenceCounter {
    next: Mutex<u64>,
}

impl SequenceCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the next number in the sequence, starting at 1
    pub fn next(&self) -> u64 {
        let mut next = match self.next.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *next += 1;
        *next
    }

    pub fn next_cookie(&self) -> String {
        format!("cookie-{}", self.next())
    }
}
