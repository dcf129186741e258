//! Execution protection: `chmod +x` on files that came from the network or
//! look like binaries.
//!
//! Git-tracked files are the project's own; everything else that is being
//! made executable is held up if the ledger remembers downloading it, or if
//! a content probe says it is an executable.

use crate::bash::ParsedCommand;
use crate::checks::{Check, CheckResult};
use crate::config::Policy;
use crate::ledger::DownloadLedger;
use crate::paths::{SUBPROCESS_TIMEOUT, Workspace, is_git_tracked, run_with_timeout};
use std::cell::RefCell;
use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::rc::Rc;

const CHECK_NAME: &str = "execution_check";

/// Known executable signatures: ELF, Windows PE, Mach-O (32/64/universal),
/// and shebang scripts.
const BINARY_MAGIC: &[(&str, &[u8])] = &[
    ("ELF executable", &[0x7f, b'E', b'L', b'F']),
    ("Windows PE", &[b'M', b'Z']),
    ("Mach-O 32-bit", &[0xfe, 0xed, 0xfa, 0xce]),
    ("Mach-O 64-bit", &[0xfe, 0xed, 0xfa, 0xcf]),
    ("Mach-O universal", &[0xca, 0xfe, 0xba, 0xbe]),
    ("Script with shebang", &[b'#', b'!']),
];

pub struct ExecutionCheck {
    workspace: Workspace,
    policy: Policy,
    ledger: Rc<RefCell<DownloadLedger>>,
}

impl ExecutionCheck {
    #[must_use]
    pub fn new(workspace: &Workspace, policy: &Policy, ledger: Rc<RefCell<DownloadLedger>>) -> Self {
        Self {
            workspace: workspace.clone(),
            policy: policy.clone(),
            ledger,
        }
    }

    fn check_chmod(&self, cmd: &ParsedCommand) -> CheckResult {
        if !makes_executable(cmd) {
            return CheckResult::allow(CHECK_NAME);
        }

        // Targets come straight from Args: path-likeness filtering would
        // drop bare names like `payload`.
        for target in &cmd.args {
            if is_mode_token(target) {
                continue;
            }

            let resolved = self.workspace.resolve(target);

            if self.policy.download_protection.git_tracked_allow
                && is_git_tracked(&resolved, &self.workspace.project_root)
            {
                continue;
            }

            if self.ledger.borrow_mut().contains(&resolved) {
                return CheckResult::ask(
                    CHECK_NAME,
                    format!("chmod +x on downloaded file: {target}"),
                    format!("File was downloaded from internet. Give user: `chmod +x {target}`"),
                );
            }

            if self.policy.download_protection.detect_binary_by_magic {
                if let Some(result) = self.check_binary_type(&resolved, target) {
                    return result;
                }
            }
        }

        CheckResult::allow(CHECK_NAME)
    }

    /// Probe the file type via `file -b`, falling back to reading magic
    /// bytes when the command is unavailable. `None` means nothing
    /// suspicious was observed.
    fn check_binary_type(&self, path: &Path, original: &str) -> Option<CheckResult> {
        let meta = std::fs::metadata(path).ok()?;
        if meta.is_dir() {
            return None;
        }

        let mut cmd = Command::new("file");
        cmd.arg("-b")
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());

        match run_with_timeout(cmd, SUBPROCESS_TIMEOUT) {
            Some(output) if output.status.success() => {
                let description = String::from_utf8_lossy(&output.stdout).to_lowercase();
                let suspicious = ["executable", "script", "elf", "mach-o", "pe32"]
                    .iter()
                    .any(|marker| description.contains(marker));
                suspicious.then(|| {
                    CheckResult::ask(
                        CHECK_NAME,
                        format!("chmod +x on binary/script file: {original}"),
                        format!("File appears to be executable. Give user: `chmod +x {original}`"),
                    )
                })
            }
            _ if self.policy.download_protection.file_command_fallback => {
                self.check_magic_bytes(path, original)
            }
            _ => None,
        }
    }

    fn check_magic_bytes(&self, path: &Path, original: &str) -> Option<CheckResult> {
        let mut file = std::fs::File::open(path).ok()?;
        let mut header = [0u8; 8];
        let n = file.read(&mut header).ok()?;
        if n < 2 {
            return None;
        }

        for (file_type, magic) in BINARY_MAGIC {
            if header[..n].starts_with(magic) {
                return Some(CheckResult::ask(
                    CHECK_NAME,
                    format!("chmod +x on {file_type}: {original}"),
                    format!("File is {file_type}. Give user: `chmod +x {original}`"),
                ));
            }
        }
        None
    }
}

impl Check for ExecutionCheck {
    fn name(&self) -> &'static str {
        CHECK_NAME
    }

    fn check_command(&mut self, _raw: &str, commands: &[ParsedCommand]) -> CheckResult {
        for cmd in commands {
            if cmd.command == "chmod" {
                let result = self.check_chmod(cmd);
                if !result.is_allowed() {
                    return result;
                }
            }
        }
        CheckResult::allow(CHECK_NAME)
    }
}

/// Whether a chmod invocation grants execute permission: a symbolic `+x`
/// anywhere, or a numeric mode with any execute bit set.
fn makes_executable(cmd: &ParsedCommand) -> bool {
    cmd.args.iter().chain(cmd.flags.iter()).any(|token| {
        if token.contains("+x") {
            return true;
        }
        if is_numeric(token) && token.len() >= 3 {
            return token
                .chars()
                .filter_map(|c| c.to_digit(8))
                .any(|d| d & 1 != 0);
        }
        false
    })
}

/// Mode tokens among positional args: `+x`, `755`, `u+rx` and friends.
fn is_mode_token(token: &str) -> bool {
    if token.starts_with('+') || is_numeric(token) {
        return true;
    }
    let mut chars = token.chars();
    matches!(chars.next(), Some('u' | 'g' | 'o' | 'a')) && token.contains('+') && token.len() >= 2
}

fn is_numeric(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bash::parse;
    use crate::checks::Decision;

    struct Fixture {
        dir: tempfile::TempDir,
        workspace: Workspace,
        policy: Policy,
        ledger: Rc<RefCell<DownloadLedger>>,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let mut policy = Policy::default();
        // Keep unit tests hermetic: no git, no `file` probing.
        policy.download_protection.git_tracked_allow = false;
        policy.download_protection.detect_binary_by_magic = false;
        let workspace = Workspace::rooted(dir.path(), &policy);
        let ledger = Rc::new(RefCell::new(DownloadLedger::for_workspace(
            &workspace, &policy,
        )));
        Fixture {
            dir,
            workspace,
            policy,
            ledger,
        }
    }

    fn run(fx: &Fixture, command: &str) -> CheckResult {
        let mut check = ExecutionCheck::new(&fx.workspace, &fx.policy, fx.ledger.clone());
        check.check_command(command, &parse(command))
    }

    #[test]
    fn chmod_on_downloaded_file_asks() {
        let fx = fixture();
        let resolved = fx.workspace.resolve("payload");
        fx.ledger
            .borrow_mut()
            .record(&resolved, "https://example.com/payload")
            .unwrap();

        let result = run(&fx, "chmod +x payload");
        assert_eq!(result.decision, Decision::Ask);
        assert!(result.reason.contains("downloaded"));
    }

    #[test]
    fn chmod_on_untracked_plain_file_is_allowed() {
        let fx = fixture();
        let result = run(&fx, "chmod +x scripts/run.sh");
        assert!(result.is_allowed());
    }

    #[test]
    fn non_execute_chmod_is_ignored() {
        let fx = fixture();
        let resolved = fx.workspace.resolve("payload");
        fx.ledger
            .borrow_mut()
            .record(&resolved, "https://example.com/payload")
            .unwrap();

        assert!(run(&fx, "chmod 644 payload").is_allowed());
        assert!(run(&fx, "chmod -x payload").is_allowed());
    }

    #[test]
    fn numeric_execute_modes_are_detected() {
        let fx = fixture();
        let resolved = fx.workspace.resolve("payload");
        fx.ledger
            .borrow_mut()
            .record(&resolved, "https://example.com/payload")
            .unwrap();

        assert_eq!(run(&fx, "chmod 755 payload").decision, Decision::Ask);
        assert_eq!(run(&fx, "chmod 700 payload").decision, Decision::Ask);
    }

    #[test]
    fn magic_bytes_flag_elf_headers() {
        let fx = fixture();
        let mut policy = fx.policy.clone();
        policy.download_protection.detect_binary_by_magic = true;
        policy.download_protection.file_command_fallback = true;

        let elf = fx.dir.path().join("vendor_tool");
        std::fs::write(&elf, [0x7f, b'E', b'L', b'F', 2, 1, 1, 0]).unwrap();

        let check = ExecutionCheck::new(&fx.workspace, &policy, fx.ledger.clone());
        let result = check.check_magic_bytes(&fx.workspace.resolve("vendor_tool"), "vendor_tool");
        let result = result.expect("ELF header should be flagged");
        assert_eq!(result.decision, Decision::Ask);
        assert!(result.reason.contains("ELF"));
    }

    #[test]
    fn shebang_counts_as_executable_content() {
        let fx = fixture();
        let script = fx.dir.path().join("tool");
        std::fs::write(&script, "#!/bin/sh\necho hi\n").unwrap();

        let check = ExecutionCheck::new(&fx.workspace, &fx.policy, fx.ledger.clone());
        let result = check.check_magic_bytes(&fx.workspace.resolve("tool"), "tool");
        assert!(result.is_some());
    }

    #[test]
    fn mode_token_classification() {
        assert!(is_mode_token("+x"));
        assert!(is_mode_token("755"));
        assert!(is_mode_token("u+rx"));
        assert!(is_mode_token("a+x"));
        assert!(!is_mode_token("payload"));
        assert!(!is_mode_token("scripts/run.sh"));
    }

    #[test]
    fn execute_intent_detection() {
        let cmds = parse("chmod u+x tool");
        assert!(makes_executable(&cmds[0]));
        let cmds = parse("chmod 644 tool");
        assert!(!makes_executable(&cmds[0]));
        let cmds = parse("chmod 751 tool");
        assert!(makes_executable(&cmds[0]));
    }
}
