//! Decision engine: the front door.
//!
//! Reads the envelope, dispatches to the right handler, emits the decision.
//! The failure policy is one-sided: the guardian must never block the host
//! because of its own problems, so envelope errors, unknown tools and
//! internal faults all resolve to allow. Policy matches are the only
//! source of non-allow output.

use crate::checks::CheckResult;
use crate::config::{Policy, find_policy_path};
use crate::handlers;
use crate::hook::{self, Logger, MAX_INPUT_BYTES};
use crate::paths::Workspace;
use serde_json::{Map, Value};

/// Evaluate one tool invocation. Unknown tools allow.
#[must_use]
pub fn process(
    tool_name: &str,
    tool_input: &Map<String, Value>,
    workspace: &Workspace,
    policy: &Policy,
) -> CheckResult {
    handlers::dispatch(tool_name, tool_input, workspace, policy)
        .unwrap_or_else(|| CheckResult::allow("unknown_tool"))
}

/// Full hook run: stdin to stdout. Returns the process exit code, which is
/// always 0 so the host processes whatever JSON was written.
pub fn run() -> i32 {
    hook::configure_colors();

    let policy = Policy::load(find_policy_path().as_deref());
    let logger = Logger::from_policy(&policy.logging);

    let envelope = match hook::read_hook_input(MAX_INPUT_BYTES) {
        Ok(envelope) => envelope,
        Err(err) => {
            logger.log_debug(&format!("unreadable hook input: {err:?}"));
            return 0;
        }
    };

    let tool_name = envelope.tool_name.unwrap_or_default();
    let tool_input = envelope.tool_input.unwrap_or_default();

    logger.log_call(&tool_name, &tool_input);

    let workspace = Workspace::detect(&policy);

    // A panic anywhere below is a guardian bug, and guardian bugs must not
    // block the host.
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        process(&tool_name, &tool_input, &workspace, &policy)
    }))
    .unwrap_or_else(|_| CheckResult::allow("engine"));

    if !result.is_allowed() {
        logger.log_blocked(&tool_name, &result);
        hook::emit_decision(&result);
    }

    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::Decision;

    fn fixture() -> (tempfile::TempDir, Workspace, Policy) {
        let dir = tempfile::tempdir().unwrap();
        let mut policy = Policy::default();
        policy.download_protection.git_tracked_allow = false;
        policy.download_protection.detect_binary_by_magic = false;
        let ws = Workspace::rooted(dir.path(), &policy);
        (dir, ws, policy)
    }

    fn bash_input(command: &str) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("command".to_string(), Value::String(command.to_string()));
        map
    }

    #[test]
    fn unknown_tool_allows() {
        let (_dir, ws, policy) = fixture();
        let result = process("SomeNewTool", &Map::new(), &ws, &policy);
        assert!(result.is_allowed());
    }

    #[test]
    fn empty_input_allows() {
        let (_dir, ws, policy) = fixture();
        assert!(process("Bash", &Map::new(), &ws, &policy).is_allowed());
        assert!(process("", &Map::new(), &ws, &policy).is_allowed());
    }

    #[test]
    fn bash_deny_flows_through() {
        let (_dir, ws, policy) = fixture();
        let result = process("Bash", &bash_input("rm -rf /"), &ws, &policy);
        assert_eq!(result.decision, Decision::Deny);
    }

    #[test]
    fn determinism_same_input_same_output() {
        let (_dir, ws, policy) = fixture();
        let first = process("Bash", &bash_input("git push --force"), &ws, &policy);
        let second = process("Bash", &bash_input("git push --force"), &ws, &policy);
        assert_eq!(first, second);
    }
}
