//! Directory boundary enforcement: the primary protection layer.
//!
//! Every path a command touches must canonicalise into the project root or
//! an allowed root. Paths that escape through an in-project symlink are
//! denied as bypass attempts; paths that are simply outside are denied with
//! guidance to let the user run the command themselves.

use crate::bash::ParsedCommand;
use crate::checks::{Check, CheckResult, is_non_path_command, path_candidates};
use crate::paths::Workspace;

const CHECK_NAME: &str = "directory_check";

pub struct DirectoryCheck {
    workspace: Workspace,
}

impl DirectoryCheck {
    #[must_use]
    pub fn new(workspace: &Workspace) -> Self {
        Self {
            workspace: workspace.clone(),
        }
    }

    fn guidance_for(&self, operation: &str, path: &str) -> String {
        match operation {
            "cat" | "less" | "head" | "tail" | "read" => {
                format!("Path is outside project. Give user the command: `cat {path}`")
            }
            "rm" | "unlink" | "rmdir" => {
                format!("Cannot delete files outside project. Give user the command: `rm {path}`")
            }
            "cp" | "mv" => format!(
                "Cannot copy/move files outside project. Give user the command: `{operation} {path}`"
            ),
            "find" | "ls" => format!(
                "Cannot search outside project. Give user the command: `{operation} {path}`"
            ),
            "echo" | "tee" | "write" | ">" | ">>" => {
                format!("Cannot write outside project. Give user the command for writing to {path}")
            }
            _ => format!(
                "Operation '{operation}' blocked outside project. Give user the command or add the path to allowed_paths in the policy."
            ),
        }
    }

    fn check_one(&self, path: &str, operation: &str) -> CheckResult {
        let resolved = self.workspace.resolve(path);

        // Symlink escape is a bypass, not a boundary miss.
        if self.workspace.is_symlink_escape(path) {
            return CheckResult::deny(
                CHECK_NAME,
                format!(
                    "Symlink escape detected: '{}' resolves to '{}' outside project",
                    path,
                    resolved.display()
                ),
                "Symlink points outside project boundaries. This is a security bypass attempt.",
            );
        }

        if !self.workspace.contains(&resolved) {
            // Anything might live outside the project: wallets, password
            // stores, credentials. The user runs those commands, not the agent.
            return CheckResult::deny(
                CHECK_NAME,
                format!("Path '{}' is outside project boundaries", resolved.display()),
                self.guidance_for(operation, path),
            );
        }

        CheckResult::allow(CHECK_NAME)
    }
}

impl Check for DirectoryCheck {
    fn name(&self) -> &'static str {
        CHECK_NAME
    }

    fn check_command(&mut self, _raw: &str, commands: &[ParsedCommand]) -> CheckResult {
        for cmd in commands {
            if is_non_path_command(&cmd.command) {
                // Arguments are text, but redirects still write files.
                for target in &cmd.redirects {
                    let result = self.check_one(target, &cmd.command);
                    if !result.is_allowed() {
                        return result;
                    }
                }
                continue;
            }

            for path in path_candidates(cmd) {
                let result = self.check_one(&path, &cmd.command);
                if !result.is_allowed() {
                    return result;
                }
            }
        }

        CheckResult::allow(CHECK_NAME)
    }

    fn check_path(&mut self, path: &str, operation: &str) -> CheckResult {
        self.check_one(path, operation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bash::parse;
    use crate::checks::Decision;
    use crate::config::Policy;

    fn workspace() -> (tempfile::TempDir, Workspace) {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::rooted(dir.path(), &Policy::default());
        (dir, ws)
    }

    fn run(ws: &Workspace, command: &str) -> CheckResult {
        let mut check = DirectoryCheck::new(ws);
        check.check_command(command, &parse(command))
    }

    #[test]
    fn in_project_paths_are_allowed() {
        let (_dir, ws) = workspace();
        assert!(run(&ws, "cat src/main.rs").is_allowed());
        assert!(run(&ws, "rm -rf target/").is_allowed());
    }

    #[test]
    fn absolute_outside_path_is_denied() {
        let (_dir, ws) = workspace();
        let result = run(&ws, "rm -rf /");
        assert_eq!(result.decision, Decision::Deny);
        assert!(result.reason.contains("outside project"));
    }

    #[test]
    fn parent_traversal_is_denied() {
        let (_dir, ws) = workspace();
        let result = run(&ws, "cat ../../etc/passwd");
        assert_eq!(result.decision, Decision::Deny);
    }

    #[test]
    fn echo_redirect_outside_is_denied() {
        let (_dir, ws) = workspace();
        let result = run(&ws, "echo pwned > /etc/cron.d/job");
        assert_eq!(result.decision, Decision::Deny);
    }

    #[test]
    fn echo_text_argument_is_not_a_path() {
        let (_dir, ws) = workspace();
        assert!(run(&ws, "echo /etc/passwd").is_allowed());
    }

    #[test]
    fn grep_pattern_is_not_a_path() {
        let (_dir, ws) = workspace();
        assert!(run(&ws, "grep /etc README.md").is_allowed());
    }

    #[test]
    fn substitution_command_is_boundary_checked() {
        let (_dir, ws) = workspace();
        let result = run(&ws, "echo $(rm -rf ../outside)");
        assert_eq!(result.decision, Decision::Deny);
    }

    #[test]
    fn allowed_paths_extend_the_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let extra = tempfile::tempdir().unwrap();
        let mut policy = Policy::default();
        policy.directories.allowed_paths =
            vec![extra.path().to_string_lossy().into_owned()];
        let ws = Workspace::rooted(dir.path(), &policy);

        let command = format!("cat {}/notes.txt", extra.path().display());
        assert!(run(&ws, &command).is_allowed());
    }

    #[cfg(unix)]
    #[test]
    fn symlink_escape_is_denied() {
        let outside = tempfile::tempdir().unwrap();
        let (dir, ws) = workspace();
        std::fs::write(outside.path().join("id_rsa"), "key").unwrap();
        std::os::unix::fs::symlink(outside.path().join("id_rsa"), dir.path().join("id_rsa"))
            .unwrap();

        let result = run(&ws, "cat id_rsa");
        assert_eq!(result.decision, Decision::Deny);
        assert!(result.reason.contains("Symlink escape"));
    }

    #[test]
    fn check_path_guidance_names_the_operation() {
        let (_dir, ws) = workspace();
        let mut check = DirectoryCheck::new(&ws);
        let result = check.check_path("/etc/passwd", "read");
        assert_eq!(result.decision, Decision::Deny);
        assert!(result.guidance.contains("cat /etc/passwd"));
    }
}
