//! Deletion protection.
//!
//! The directory check already denies deletions outside the project; this
//! check guards what remains: recursive deletion of protected paths, of
//! directories containing protected paths, of the project root itself, and
//! glob-only targets like `rm -rf *`.

use crate::bash::{ParsedCommand, extract_paths};
use crate::checks::{Check, CheckResult};
use crate::config::Policy;
use crate::paths::Workspace;

const CHECK_NAME: &str = "deletion_check";

const DELETE_COMMANDS: &[&str] = &["rm", "rmdir", "unlink", "shred"];

pub struct DeletionCheck {
    workspace: Workspace,
    protected: Vec<String>,
}

impl DeletionCheck {
    #[must_use]
    pub fn new(workspace: &Workspace, policy: &Policy) -> Self {
        Self {
            workspace: workspace.clone(),
            protected: protected_directories(policy),
        }
    }

    fn check_deletion(&self, cmd: &ParsedCommand) -> CheckResult {
        let paths = extract_paths(cmd);
        let recursive = has_recursive_flag(&cmd.flags);

        // `rm -rf *` has no path-like argument, but the glob is the target.
        if recursive && paths.is_empty() {
            for arg in &cmd.args {
                if arg.contains(['*', '?', '[']) {
                    return CheckResult::ask(
                        CHECK_NAME,
                        format!("Recursive deletion with glob pattern: {} {arg}", cmd.command),
                        format!(
                            "Glob-based recursive deletion is dangerous. Give user the command: `{} {} {}`",
                            cmd.command,
                            cmd.flags.join(" "),
                            cmd.args.join(" ")
                        ),
                    );
                }
            }
        }

        for path in &paths {
            let resolved = self.workspace.resolve(path);

            if !self.workspace.contains(&resolved) {
                return CheckResult::ask(
                    CHECK_NAME,
                    format!("Cannot delete files outside project: {path}"),
                    format!("Give user the command: `rm {} {path}`", cmd.flags.join(" ")),
                );
            }

            if recursive {
                let result = self.check_recursive_target(&resolved, path);
                if !result.is_allowed() {
                    return result;
                }
            }
        }

        CheckResult::allow(CHECK_NAME)
    }

    fn check_recursive_target(&self, resolved: &std::path::Path, original: &str) -> CheckResult {
        let Some(relative) = self.workspace.relative(resolved) else {
            // Outside targets were handled above.
            return CheckResult::allow(CHECK_NAME);
        };
        let relative = relative.to_string_lossy();

        for protected in &self.protected {
            if relative.as_ref() == protected.as_str()
                || relative.starts_with(&format!("{protected}/"))
            {
                return CheckResult::ask(
                    CHECK_NAME,
                    format!("Cannot recursively delete protected path: {original}"),
                    format!("Path '{original}' is protected. Give user the command if needed."),
                );
            }
            if protected.starts_with(&format!("{relative}/")) {
                return CheckResult::ask(
                    CHECK_NAME,
                    format!("Cannot recursively delete directory containing protected path: {original}"),
                    format!(
                        "Path '{original}' contains protected content '{protected}'. Give user the command if needed."
                    ),
                );
            }
        }

        if resolved == self.workspace.project_root || relative.is_empty() || relative == "." {
            return CheckResult::ask(
                CHECK_NAME,
                "Cannot recursively delete project root",
                "Deleting entire project is blocked. Be more specific about what to delete.",
            );
        }

        CheckResult::allow(CHECK_NAME)
    }
}

impl Check for DeletionCheck {
    fn name(&self) -> &'static str {
        CHECK_NAME
    }

    fn check_command(&mut self, _raw: &str, commands: &[ParsedCommand]) -> CheckResult {
        for cmd in commands {
            if DELETE_COMMANDS.contains(&cmd.command.as_str()) {
                let result = self.check_deletion(cmd);
                if !result.is_allowed() {
                    return result;
                }
            }
        }
        CheckResult::allow(CHECK_NAME)
    }
}

/// Recursive intent: `-r`/`-R`/`--recursive`, alone or inside a clustered
/// short flag like `-rfv`.
fn has_recursive_flag(flags: &[String]) -> bool {
    flags.iter().any(|flag| {
        if flag == "--recursive" {
            return true;
        }
        flag.starts_with('-')
            && !flag.starts_with("--")
            && flag[1..].chars().any(|c| c == 'r' || c == 'R')
    })
}

/// Protected directory prefixes derived from `no_modify` globs, wildcards
/// stripped. `.git` is always protected.
fn protected_directories(policy: &Policy) -> Vec<String> {
    let mut protected: Vec<String> = Vec::new();

    for pattern in &policy.protected_paths.no_modify {
        let base = pattern.split('*').next().unwrap_or("");
        let base = base.trim_end_matches('/');
        if !base.is_empty() && base != "." {
            protected.push(base.to_string());
        }
    }

    if !protected.iter().any(|p| p == ".git") {
        protected.push(".git".to_string());
    }

    protected
}
