//! The Bash tool handler: the full nine-check pipeline.
//!
//! Order matters and is fixed: bypasses first (eval, pipe-to-shell), then
//! the directory boundary (a hard deny must win over a later ask), then the
//! specialised checks, and finally content inspection of any script the
//! command would execute.

use crate::bash::{self, ParsedCommand};
use crate::checks::Check;
use crate::checks::bypass::BypassCheck;
use crate::checks::code_content::CodeContentCheck;
use crate::checks::deletion::DeletionCheck;
use crate::checks::directory::DirectoryCheck;
use crate::checks::download::DownloadCheck;
use crate::checks::execution::ExecutionCheck;
use crate::checks::git::GitCheck;
use crate::checks::secrets::SecretsCheck;
use crate::checks::unpack::UnpackCheck;
use crate::checks::CheckResult;
use crate::config::Policy;
use crate::handlers::get_str;
use crate::ledger::DownloadLedger;
use crate::paths::Workspace;
use regex::Regex;
use serde_json::{Map, Value};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::LazyLock;

const HANDLER_NAME: &str = "bash_handler";

/// Interpreter invocations whose first capture is the script being run.
static SCRIPT_EXECUTION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"^python3?\s+(\S+\.py)\b",
        r"^(?:ba)?sh\s+(\S+\.sh)\b",
        r"^source\s+(\S+\.sh)\b",
        r"^\.\s+(\S+\.sh)\b",
        r"^ruby\s+(\S+\.rb)\b",
        r"^perl\s+(\S+\.pl)\b",
        r"^node\s+(\S+\.js)\b",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

const INTERPRETERS: &[&str] = &["python", "python3", "bash", "sh", "ruby", "perl", "node"];

const SCRIPT_SUFFIXES: &[&str] = &[".py", ".sh", ".bash", ".rb", ".pl", ".js"];

pub fn handle(
    tool_input: &Map<String, Value>,
    workspace: &Workspace,
    policy: &Policy,
) -> CheckResult {
    let command = get_str(tool_input, "command");
    if command.trim().is_empty() {
        return CheckResult::allow(HANDLER_NAME);
    }

    let parsed = bash::parse(command);
    if parsed.is_empty() {
        return CheckResult::allow(HANDLER_NAME);
    }

    // The download and execution checks share the ledger: one records, the
    // other consults.
    let ledger = Rc::new(RefCell::new(DownloadLedger::for_workspace(workspace, policy)));

    let mut checks: Vec<Box<dyn Check>> = vec![
        Box::new(BypassCheck::new(policy)),
        Box::new(DirectoryCheck::new(workspace)),
        Box::new(UnpackCheck::new(workspace, policy)),
        Box::new(GitCheck::new(policy)),
        Box::new(DeletionCheck::new(workspace, policy)),
        Box::new(DownloadCheck::new(workspace, policy, ledger.clone())),
        Box::new(ExecutionCheck::new(workspace, policy, ledger)),
        Box::new(SecretsCheck::new(workspace, policy)),
    ];

    for check in &mut checks {
        let result = check.check_command(command, &parsed);
        if !result.is_allowed() {
            return result;
        }
    }

    // Finally, look inside any script this command would execute.
    let code_content = CodeContentCheck::new(workspace, policy);
    for cmd in &parsed {
        if let Some(script) = extract_script_path(cmd) {
            let result = code_content.check_file(&script);
            if !result.is_allowed() {
                return result;
            }
        }
    }

    CheckResult::allow(HANDLER_NAME)
}

/// The script a command executes, if any: `python x.py`, `bash run.sh`,
/// `./deploy.sh`, `tools/gen.py`.
fn extract_script_path(cmd: &ParsedCommand) -> Option<String> {
    let full = if cmd.args.is_empty() {
        cmd.command.clone()
    } else {
        format!("{} {}", cmd.command, cmd.args.join(" "))
    };

    for pattern in SCRIPT_EXECUTION_PATTERNS.iter() {
        if let Some(captures) = pattern.captures(&full) {
            if let Some(m) = captures.get(1) {
                return Some(m.as_str().to_string());
            }
        }
    }

    // Interpreter with the script somewhere among the arguments.
    if INTERPRETERS.contains(&cmd.command.as_str()) {
        for arg in &cmd.args {
            if SCRIPT_SUFFIXES.iter().any(|ext| arg.ends_with(ext)) {
                return Some(arg.clone());
            }
        }
        return None;
    }

    // Direct execution: the command itself is the script path.
    let base = cmd.command.rsplit('/').next().unwrap_or(&cmd.command);
    if SCRIPT_SUFFIXES.iter().any(|ext| base.ends_with(ext)) {
        return Some(cmd.command.clone());
    }

    None
}
