//! Protected and sensitive file access inside the project.
//!
//! Two distinct protections: `no_modify` paths may be read but not written;
//! secrets files (`no_read_content` ∪ `forbidden_read`) may be neither read
//! nor written. Globs match both the filename and the project-relative
//! path, and a leading `!` carves out an explicit exception that always
//! wins (`.env` blocked, `.env.example` fine).

use crate::bash::ParsedCommand;
use crate::checks::{Check, CheckResult, is_non_path_command, is_write_operation, path_candidates};
use crate::config::Policy;
use crate::paths::Workspace;

const CHECK_NAME: &str = "secrets_check";

pub struct SecretsCheck {
    workspace: Workspace,
    policy: Policy,
}

impl SecretsCheck {
    #[must_use]
    pub fn new(workspace: &Workspace, policy: &Policy) -> Self {
        Self {
            workspace: workspace.clone(),
            policy: policy.clone(),
        }
    }

    fn check_one(&self, path: &str, operation: &str) -> CheckResult {
        let resolved = self.workspace.resolve(path);

        // Paths outside the project are the directory check's concern.
        let Some(relative) = self.workspace.relative(&resolved) else {
            return CheckResult::allow(CHECK_NAME);
        };
        let relative = relative.to_string_lossy().into_owned();

        if is_write_operation(operation) {
            if self.matches_no_modify(&relative) {
                return CheckResult::deny(
                    CHECK_NAME,
                    format!("Cannot modify protected file: {path}"),
                    format!("File is protected. Cannot modify {path}."),
                );
            }
            // Writing into a secrets file is as bad as reading it:
            // `echo KEY=1 > .env` destroys or plants secrets.
            if self.matches_no_read(&relative) {
                return CheckResult::deny(
                    CHECK_NAME,
                    format!("Cannot write to secrets file: {path}"),
                    format!("File {path} is a secrets file. Cannot write to it."),
                );
            }
        } else if self.matches_no_read(&relative) {
            return CheckResult::deny(
                CHECK_NAME,
                format!("Cannot read secrets file: {path}"),
                self.secrets_guidance(path, &relative),
            );
        }

        CheckResult::allow(CHECK_NAME)
    }

    fn matches_no_read(&self, relative: &str) -> bool {
        let patterns = self
            .policy
            .protected_paths
            .no_read_content
            .iter()
            .chain(self.policy.sensitive_files.forbidden_read.iter());

        let filename = basename(relative);

        // Negations win over any positive match.
        for pattern in patterns.clone() {
            if let Some(negated) = pattern.strip_prefix('!') {
                let negated = negated.strip_prefix("**/").unwrap_or(negated);
                if glob_match(filename, negated) || glob_match(relative, negated) {
                    return false;
                }
            }
        }

        for pattern in patterns {
            if pattern.starts_with('!') {
                continue;
            }
            let cleaned = pattern.strip_prefix("**/").unwrap_or(pattern);
            if glob_match(filename, cleaned) || glob_match(relative, cleaned) {
                return true;
            }
        }

        false
    }

    fn matches_no_modify(&self, relative: &str) -> bool {
        self.policy
            .protected_paths
            .no_modify
            .iter()
            .any(|pattern| matches_protected(relative, pattern))
    }

    fn secrets_guidance(&self, path: &str, relative: &str) -> String {
        if relative.contains(".env") {
            let example = relative.replacen(".env", ".env.example", 1);
            if self.workspace.project_root.join(&example).exists() {
                return format!(
                    "Cannot read {path} (secrets file). Look at {example} for structure, then ask user for values."
                );
            }
            return format!(
                "Cannot read {path} (secrets file). Ask user what environment variables are needed."
            );
        }
        format!("Cannot read {path} (protected file). Ask user for needed information.")
    }
}

impl Check for SecretsCheck {
    fn name(&self) -> &'static str {
        CHECK_NAME
    }

    fn check_command(&mut self, _raw: &str, commands: &[ParsedCommand]) -> CheckResult {
        for cmd in commands {
            if is_non_path_command(&cmd.command) {
                // `echo secret > .env.bak` writes through the redirect.
                for target in &cmd.redirects {
                    let result = self.check_one(target, "write");
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

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn glob_match(name: &str, pattern: &str) -> bool {
    glob::Pattern::new(pattern)
        .map(|p| p.matches(name))
        .unwrap_or(false)
}

/// `no_modify` matching. `PREFIX/**` also matches `PREFIX` itself, so
/// `.git/**` protects `.git` from being renamed or replaced wholesale.
fn matches_protected(relative: &str, pattern: &str) -> bool {
    if let Some(base) = pattern.strip_suffix("/**") {
        return relative == base || relative.starts_with(&format!("{base}/"));
    }
    if let Some(rest) = pattern.strip_prefix("**/") {
        if glob_match(basename(relative), rest) || glob_match(relative, rest) {
            return true;
        }
    }
    glob_match(relative, pattern)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bash::parse;
    use crate::checks::Decision;

    fn fixture() -> (tempfile::TempDir, SecretsCheck) {
        let dir = tempfile::tempdir().unwrap();
        let policy = Policy::default();
        let ws = Workspace::rooted(dir.path(), &policy);
        (dir, SecretsCheck::new(&ws, &policy))
    }

    fn run(check: &mut SecretsCheck, command: &str) -> CheckResult {
        check.check_command(command, &parse(command))
    }

    #[test]
    fn reading_env_is_denied() {
        let (_dir, mut check) = fixture();
        let result = run(&mut check, "cat .env");
        assert_eq!(result.decision, Decision::Deny);
        assert!(result.reason.contains(".env"));
    }

    #[test]
    fn env_example_negation_wins() {
        let (_dir, mut check) = fixture();
        assert!(run(&mut check, "cat .env.example").is_allowed());
        assert!(run(&mut check, "cat .env.template").is_allowed());
    }

    #[test]
    fn env_variants_are_denied() {
        let (_dir, mut check) = fixture();
        assert_eq!(run(&mut check, "cat .env.local").decision, Decision::Deny);
        assert_eq!(
            run(&mut check, "cat config/.env").decision,
            Decision::Deny
        );
    }

    #[test]
    fn key_material_is_denied() {
        let (_dir, mut check) = fixture();
        assert_eq!(run(&mut check, "cat server.pem").decision, Decision::Deny);
        assert_eq!(run(&mut check, "cat id_rsa").decision, Decision::Deny);
        assert_eq!(
            run(&mut check, "cat .ssh/id_ed25519.pub").decision,
            Decision::Deny
        );
    }

    #[test]
    fn writing_to_env_via_redirect_is_denied() {
        let (_dir, mut check) = fixture();
        let result = run(&mut check, "echo SECRET=1 > .env");
        assert_eq!(result.decision, Decision::Deny);
        assert!(result.reason.contains("secrets file") || result.reason.contains(".env"));
    }

    #[test]
    fn modifying_protected_settings_is_denied() {
        let (_dir, mut check) = fixture();
        let result = check.check_path(".claude/settings.json", "write");
        assert_eq!(result.decision, Decision::Deny);
        assert!(result.reason.contains("protected"));
    }

    #[test]
    fn reading_protected_settings_is_fine() {
        let (_dir, mut check) = fixture();
        assert!(check.check_path(".claude/settings.json", "read").is_allowed());
    }

    #[test]
    fn git_directory_modification_is_denied() {
        let (_dir, mut check) = fixture();
        assert_eq!(
            check.check_path(".git/config", "write").decision,
            Decision::Deny
        );
        assert_eq!(check.check_path(".git", "mv").decision, Decision::Deny);
    }

    #[test]
    fn grep_env_pattern_is_not_a_read() {
        let (_dir, mut check) = fixture();
        assert!(run(&mut check, "grep .env README.md").is_allowed());
    }

    #[test]
    fn outside_paths_are_not_this_checks_business() {
        let (_dir, mut check) = fixture();
        assert!(check.check_path("/etc/passwd", "read").is_allowed());
    }

    #[test]
    fn env_guidance_points_at_example_when_present() {
        let (dir, mut check) = fixture();
        std::fs::write(dir.path().join(".env.example"), "KEY=").unwrap();
        let result = check.check_path(".env", "read");
        assert_eq!(result.decision, Decision::Deny);
        assert!(result.guidance.contains(".env.example"));
    }

    #[test]
    fn protected_pattern_shapes() {
        assert!(matches_protected(".git", ".git/**"));
        assert!(matches_protected(".git/hooks/pre-commit", ".git/**"));
        assert!(!matches_protected(".github", ".git/**"));
        assert!(matches_protected(
            ".claude/settings.json",
            ".claude/settings.json"
        ));
    }
}
