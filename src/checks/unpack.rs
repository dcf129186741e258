//! Archive unpacking protection.
//!
//! Extraction is the classic way to smuggle writes outside the project:
//! `tar -C ../`, `unzip -d /`, zip-slip style traversal. The target
//! directory is recovered per tool and held to the same boundary as any
//! other write.

use crate::bash::{ParsedCommand, tokenize};
use crate::checks::{Check, CheckResult};
use crate::config::Policy;
use crate::paths::{Workspace, has_traversal};

const CHECK_NAME: &str = "unpack_check";

const UNPACK_COMMANDS: &[&str] = &[
    "tar", "unzip", "unrar", "7z", "7za", "bsdtar", "gunzip", "bunzip2", "unxz",
];

const PYTHON_UNPACK_PATTERNS: &[&str] = &[
    "python -m zipfile -e",
    "python3 -m zipfile -e",
    "python -m tarfile -e",
    "python3 -m tarfile -e",
];

/// Patterns that defeat path protection outright, not merely retarget it.
const SECURITY_BYPASS_PATTERNS: &[&str] = &["bsdtar -s"];

pub struct UnpackCheck {
    workspace: Workspace,
    policy: Policy,
}

impl UnpackCheck {
    #[must_use]
    pub fn new(workspace: &Workspace, policy: &Policy) -> Self {
        Self {
            workspace: workspace.clone(),
            policy: policy.clone(),
        }
    }

    fn check_unpack(&self, cmd: &ParsedCommand, raw: &str) -> CheckResult {
        if let Some(target) = extract_target_directory(cmd) {
            let resolved = self.workspace.resolve(&target);
            if !self.workspace.contains(&resolved) {
                return CheckResult::ask(
                    CHECK_NAME,
                    format!("Unpack target outside project: {target}"),
                    format!("Cannot unpack outside project. Give user: `{raw}`"),
                );
            }

            if self.policy.unpack_protection.check_archive_path_traversal && has_traversal(&target)
            {
                return CheckResult::deny(
                    CHECK_NAME,
                    format!("Path traversal in unpack target: {target}"),
                    "Path traversal detected. This is a security bypass.",
                );
            }
        }

        // bsdtar -s rewrites member names during extraction.
        if cmd.command == "bsdtar" && cmd.flags.iter().any(|f| f == "-s") {
            return CheckResult::deny(
                CHECK_NAME,
                "bsdtar -s (substitution) can bypass path protection",
                "bsdtar -s is blocked as it can bypass security.",
            );
        }

        CheckResult::allow(CHECK_NAME)
    }

    fn check_python_unpack(&self, raw: &str) -> CheckResult {
        let tokens = tokenize(raw);
        for (i, token) in tokens.iter().enumerate() {
            // `python -m zipfile -e archive.zip target/`
            if token == "-e" && i + 2 < tokens.len() {
                let target = &tokens[i + 2];
                let resolved = self.workspace.resolve(target);
                if !self.workspace.contains(&resolved) {
                    return CheckResult::ask(
                        CHECK_NAME,
                        format!("Python unpack target outside project: {target}"),
                        format!("Cannot unpack outside project. Give user: `{raw}`"),
                    );
                }
            }
        }
        CheckResult::allow(CHECK_NAME)
    }
}

impl Check for UnpackCheck {
    fn name(&self) -> &'static str {
        CHECK_NAME
    }

    fn check_command(&mut self, raw: &str, commands: &[ParsedCommand]) -> CheckResult {
        for pattern in SECURITY_BYPASS_PATTERNS {
            if raw.contains(pattern) {
                return CheckResult::deny(
                    CHECK_NAME,
                    format!("Security bypass pattern: {pattern}"),
                    format!("{pattern} can bypass path protection. Not allowed."),
                );
            }
        }

        for pattern in &self.policy.unpack_protection.blocked_patterns {
            if raw.contains(pattern.as_str()) {
                return CheckResult::ask(
                    CHECK_NAME,
                    format!("Blocked unpack pattern: {pattern}"),
                    format!("Unpack to allowed directory only. Give user: `{raw}`"),
                );
            }
        }

        if PYTHON_UNPACK_PATTERNS.iter().any(|p| raw.contains(p)) {
            let result = self.check_python_unpack(raw);
            if !result.is_allowed() {
                return result;
            }
        }

        for cmd in commands {
            if UNPACK_COMMANDS.contains(&cmd.command.as_str()) {
                let result = self.check_unpack(cmd, raw);
                if !result.is_allowed() {
                    return result;
                }
            }
        }

        CheckResult::allow(CHECK_NAME)
    }
}

/// Recover the extraction target directory from the raw token stream.
/// Each tool spells it differently: `tar -C`/`--directory`/`--one-top-level`,
/// `unzip -d`, `7z -o<dir>`.
fn extract_target_directory(cmd: &ParsedCommand) -> Option<String> {
    let tokens = tokenize(&cmd.raw);

    match cmd.command.as_str() {
        "tar" | "bsdtar" => {
            for (i, token) in tokens.iter().enumerate() {
                if (token == "-C" || token == "--directory") && i + 1 < tokens.len() {
                    return Some(tokens[i + 1].clone());
                }
                if let Some(rest) = token.strip_prefix("-C") {
                    if !rest.is_empty() {
                        return Some(rest.to_string());
                    }
                }
                if let Some(rest) = token.strip_prefix("--directory=") {
                    return Some(rest.to_string());
                }
                if let Some(rest) = token.strip_prefix("--one-top-level=") {
                    return Some(rest.to_string());
                }
            }
            None
        }
        "unzip" => {
            for (i, token) in tokens.iter().enumerate() {
                if token == "-d" && i + 1 < tokens.len() {
                    return Some(tokens[i + 1].clone());
                }
                if let Some(rest) = token.strip_prefix("-d") {
                    if !rest.is_empty() && !rest.starts_with('-') {
                        return Some(rest.to_string());
                    }
                }
            }
            None
        }
        "7z" | "7za" => tokens.iter().find_map(|token| {
            token
                .strip_prefix("-o")
                .filter(|rest| !rest.is_empty())
                .map(str::to_string)
        }),
        _ => None,
    }
}
