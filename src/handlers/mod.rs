//! Per-tool orchestration.
//!
//! Each handler extracts the relevant slots from the tool input and composes
//! checks in a fixed order; the first non-allow result wins. Missing inputs
//! default to allow. Unknown tools are the engine's business.

pub mod bash;
pub mod file;
pub mod search;

use crate::checks::CheckResult;
use crate::config::Policy;
use crate::paths::Workspace;
use serde_json::{Map, Value};

/// Dispatch a tool invocation to its handler. `None` means the tool is not
/// one the guardian knows about.
pub fn dispatch(
    tool_name: &str,
    tool_input: &Map<String, Value>,
    workspace: &Workspace,
    policy: &Policy,
) -> Option<CheckResult> {
    match tool_name {
        "Bash" => Some(bash::handle(tool_input, workspace, policy)),
        "Read" => Some(file::handle_read(tool_input, workspace, policy)),
        "Write" | "Edit" => Some(file::handle_write(tool_input, workspace, policy)),
        "NotebookEdit" => Some(file::handle_notebook_edit(tool_input, workspace, policy)),
        "Glob" | "Grep" => Some(search::handle(tool_input, workspace, policy)),
        _ => None,
    }
}

/// Fetch a string slot from the tool input; anything non-string reads as
/// absent.
#[must_use]
pub fn get_str<'a>(input: &'a Map<String, Value>, key: &str) -> &'a str {
    input.get(key).and_then(Value::as_str).unwrap_or("")
}
