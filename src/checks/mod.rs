//! Security checks.
//!
//! Each check consumes the parsed command sequence (or a single path) plus
//! policy and emits a [`CheckResult`]. Checks run in a fixed order per tool;
//! the first non-allow result wins.
//!
//! Checks return honest [`Decision::Ask`] values where user confirmation
//! would suffice. Elevation of ask to deny happens exactly once, at the
//! emission boundary in the engine: keeping the distinction here is what
//! makes the checks testable.

pub mod bypass;
pub mod code_content;
pub mod deletion;
pub mod directory;
pub mod download;
pub mod execution;
pub mod git;
pub mod secrets;
pub mod unpack;

use crate::bash::ParsedCommand;

/// The internal permission decision of a single check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Operation is permitted.
    Allow,
    /// User confirmation would be required (soft block).
    Ask,
    /// Hard block, no confirmation possible.
    Deny,
}

/// The result of one security check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub decision: Decision,
    /// What was observed. Empty on allow.
    pub reason: String,
    /// What the agent should do instead. Empty on allow.
    pub guidance: String,
    pub check_name: &'static str,
}

impl CheckResult {
    #[must_use]
    pub fn allow(check_name: &'static str) -> Self {
        Self {
            decision: Decision::Allow,
            reason: String::new(),
            guidance: String::new(),
            check_name,
        }
    }

    #[must_use]
    pub fn ask(check_name: &'static str, reason: impl Into<String>, guidance: impl Into<String>) -> Self {
        Self {
            decision: Decision::Ask,
            reason: reason.into(),
            guidance: guidance.into(),
            check_name,
        }
    }

    #[must_use]
    pub fn deny(check_name: &'static str, reason: impl Into<String>, guidance: impl Into<String>) -> Self {
        Self {
            decision: Decision::Deny,
            reason: reason.into(),
            guidance: guidance.into(),
            check_name,
        }
    }

    #[inline]
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        self.decision == Decision::Allow
    }
}

/// A security check over a command line or a single path.
pub trait Check {
    fn name(&self) -> &'static str;

    /// Inspect a parsed command sequence.
    fn check_command(&mut self, raw: &str, commands: &[ParsedCommand]) -> CheckResult;

    /// Inspect a single path for a tagged operation. Default: allow.
    fn check_path(&mut self, _path: &str, _operation: &str) -> CheckResult {
        CheckResult::allow(self.name())
    }
}

/// Commands whose positional arguments are never file paths. Their redirect
/// targets still matter (`echo hi > /etc/passwd`).
const NON_PATH_COMMANDS: &[&str] = &[
    "echo", "printf", "export", "unset", "alias", "unalias", "set", "true", "false", "test", "[",
];

/// Commands whose first positional argument is a pattern, not a path
/// (`grep ".env" README.md`: `.env` is a search pattern).
const PATTERN_FIRST_ARG_COMMANDS: &[&str] =
    &["grep", "egrep", "fgrep", "rg", "sed", "awk", "gawk", "expr"];

/// Commands whose positional arguments are file paths. For these, bare
/// tokens without `/`, `.` or `~` are still path candidates: a symlink
/// named `id_rsa` must be caught.
const FILE_ARG_COMMANDS: &[&str] = &[
    "cat", "less", "more", "head", "tail", "mv", "cp", "rm", "chmod", "chown", "chgrp", "touch",
    "stat", "file", "ln", "readlink", "realpath", "source", "open", "xdg-open", "nano", "vim",
    "vi", "code",
];

/// Operation tags that modify their target.
const WRITE_OPERATIONS: &[&str] = &[
    "write", "edit", "tee", "echo", ">", ">>", "cp", "mv", "rm", "touch", "sed", "awk",
];

#[must_use]
pub fn is_non_path_command(command: &str) -> bool {
    NON_PATH_COMMANDS.contains(&command)
}

#[must_use]
pub fn is_pattern_first_arg_command(command: &str) -> bool {
    PATTERN_FIRST_ARG_COMMANDS.contains(&command)
}

#[must_use]
pub fn is_file_arg_command(command: &str) -> bool {
    FILE_ARG_COMMANDS.contains(&command)
}

#[must_use]
pub fn is_write_operation(operation: &str) -> bool {
    WRITE_OPERATIONS.contains(&operation.to_lowercase().as_str())
}

/// Path candidates of one command under the shared per-command policy:
/// pattern-first-argument skipping and bare-token inclusion for
/// file-argument commands. Used by the directory and secrets checks so the
/// two stay in lockstep.
#[must_use]
pub fn path_candidates(cmd: &ParsedCommand) -> Vec<String> {
    let mut candidates = crate::bash::extract_paths(cmd);

    if is_pattern_first_arg_command(&cmd.command) {
        if let Some(first) = cmd.args.first() {
            if let Some(pos) = candidates.iter().position(|c| c == first) {
                candidates.remove(pos);
            }
        }
    }

    if is_file_arg_command(&cmd.command) {
        for arg in &cmd.args {
            if arg.starts_with('-') {
                continue;
            }
            // Already covered by extract_paths when path-like.
            if arg.contains('/') || arg.starts_with('.') || arg.starts_with('~') || arg.contains('.')
            {
                continue;
            }
            candidates.push(arg.clone());
        }
    }

    candidates
}
