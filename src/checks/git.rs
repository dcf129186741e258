//! Git operation rules.
//!
//! A git invocation is reduced to an operation string (subcommand plus
//! normalised flags) and matched against the policy's pattern lists.
//! Clustered short flags expand before matching so `git clean -fd` and
//! `git clean -f -d` are the same operation.
//!
//! Precedence: `allowed` wins over everything, then `hard_blocked` (with a
//! `--force-with-lease` exemption), then CI auto-allowance, then
//! `confirm_required`.

use crate::bash::{ParsedCommand, git_subcommand_and_flags};
use crate::checks::{Check, CheckResult};
use crate::config::Policy;
use crate::paths::is_ci_environment;
use std::collections::BTreeSet;

const CHECK_NAME: &str = "git_check";

/// Safer alternatives suggested in guidance, keyed by operation pattern.
const SAFER_ALTERNATIVES: &[(&str, &str)] = &[
    (
        "push --force",
        "Use --force-with-lease instead: `git push --force-with-lease`",
    ),
    (
        "push -f",
        "Use --force-with-lease instead: `git push --force-with-lease`",
    ),
    (
        "reset --hard",
        "Consider `git stash` first, or give user: `git reset --hard`",
    ),
    ("branch -D", "Give user the command: `git branch -D <branch>`"),
    (
        "clean -fd",
        "Try `git clean -fd --dry-run` first, or give user: `git clean -fd`",
    ),
    ("reflog expire", "Give user the command: `git reflog expire`"),
];

pub struct GitCheck {
    policy: Policy,
    in_ci: bool,
}

impl GitCheck {
    #[must_use]
    pub fn new(policy: &Policy) -> Self {
        Self {
            policy: policy.clone(),
            in_ci: is_ci_environment(),
        }
    }

    #[cfg(test)]
    fn with_ci(policy: &Policy, in_ci: bool) -> Self {
        Self {
            policy: policy.clone(),
            in_ci,
        }
    }

    fn matches_any(&self, operation: &str, patterns: &[String]) -> bool {
        patterns.iter().any(|p| matches_pattern(operation, p))
    }

    fn is_hard_blocked(&self, operation: &str) -> bool {
        if !self.matches_any(operation, &self.policy.git.hard_blocked) {
            return false;
        }
        // --force-with-lease is the sanctioned escape hatch.
        !operation.contains("--force-with-lease")
    }

    fn safer_alternative(&self, operation: &str) -> String {
        for (pattern, suggestion) in SAFER_ALTERNATIVES {
            if matches_pattern(operation, pattern) {
                return (*suggestion).to_string();
            }
        }
        format!("Give user the command: `git {operation}`")
    }
}

impl Check for GitCheck {
    fn name(&self) -> &'static str {
        CHECK_NAME
    }

    fn check_command(&mut self, _raw: &str, commands: &[ParsedCommand]) -> CheckResult {
        let Some((subcommand, flags)) = git_subcommand_and_flags(commands) else {
            return CheckResult::allow(CHECK_NAME);
        };

        let operation = build_operation(&subcommand, &flags);

        if self.matches_any(&operation, &self.policy.git.allowed) {
            return CheckResult::allow(CHECK_NAME);
        }

        if self.is_hard_blocked(&operation) {
            return CheckResult::deny(
                CHECK_NAME,
                format!("Destructive git operation blocked: {operation}"),
                self.safer_alternative(&operation),
            );
        }

        if self.in_ci && self.matches_any(&operation, &self.policy.git.ci_auto_allow) {
            return CheckResult::allow(CHECK_NAME);
        }

        if self.matches_any(&operation, &self.policy.git.confirm_required) {
            return CheckResult::ask(
                CHECK_NAME,
                format!("Git operation requires confirmation: {operation}"),
                self.safer_alternative(&operation),
            );
        }

        CheckResult::allow(CHECK_NAME)
    }
}

/// Build the canonical operation string: subcommand plus expanded, sorted
/// flags.
fn build_operation(subcommand: &str, flags: &[String]) -> String {
    let mut normalized: Vec<String> = Vec::new();
    for flag in flags {
        if flag.starts_with('-') && !flag.starts_with("--") && flag.len() > 2 {
            for ch in flag[1..].chars() {
                normalized.push(format!("-{ch}"));
            }
        } else {
            normalized.push(flag.clone());
        }
    }
    normalized.sort();

    if normalized.is_empty() {
        subcommand.to_string()
    } else {
        format!("{subcommand} {}", normalized.join(" "))
    }
}

/// Pattern match: subcommands equal, pattern flags a subset of operation
/// flags, clustered short flags on either side expanded first.
fn matches_pattern(operation: &str, pattern: &str) -> bool {
    let mut pattern_parts = pattern.split_whitespace();
    let mut operation_parts = operation.split_whitespace();

    let (Some(pattern_sub), Some(operation_sub)) = (pattern_parts.next(), operation_parts.next())
    else {
        return false;
    };
    if pattern_sub != operation_sub {
        return false;
    }

    let pattern_flags = expand_flags(pattern_parts);
    let operation_flags = expand_flags(operation_parts);

    pattern_flags.is_subset(&operation_flags)
}

fn expand_flags<'a>(flags: impl Iterator<Item = &'a str>) -> BTreeSet<String> {
    let mut set = BTreeSet::new();
    for flag in flags {
        if flag.starts_with('-') && !flag.starts_with("--") && flag.len() > 2 {
            for ch in flag[1..].chars() {
                set.insert(format!("-{ch}"));
            }
        } else {
            set.insert(flag.to_string());
        }
    }
    set
}
