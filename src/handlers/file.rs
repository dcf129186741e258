//! Read, Write, Edit and NotebookEdit handlers.

use crate::checks::Check;
use crate::checks::CheckResult;
use crate::checks::code_content::CodeContentCheck;
use crate::checks::directory::DirectoryCheck;
use crate::checks::secrets::SecretsCheck;
use crate::config::Policy;
use crate::handlers::get_str;
use crate::paths::Workspace;
use serde_json::{Map, Value};

const HANDLER_NAME: &str = "file_handler";

pub fn handle_read(
    tool_input: &Map<String, Value>,
    workspace: &Workspace,
    policy: &Policy,
) -> CheckResult {
    let file_path = get_str(tool_input, "file_path");
    if file_path.is_empty() {
        return CheckResult::allow(HANDLER_NAME);
    }

    let result = DirectoryCheck::new(workspace).check_path(file_path, "read");
    if !result.is_allowed() {
        return result;
    }

    SecretsCheck::new(workspace, policy).check_path(file_path, "read")
}

pub fn handle_write(
    tool_input: &Map<String, Value>,
    workspace: &Workspace,
    policy: &Policy,
) -> CheckResult {
    let file_path = get_str(tool_input, "file_path");
    let content = get_str(tool_input, "content");
    if file_path.is_empty() {
        return CheckResult::allow(HANDLER_NAME);
    }

    let result = DirectoryCheck::new(workspace).check_path(file_path, "write");
    if !result.is_allowed() {
        return result;
    }

    let result = SecretsCheck::new(workspace, policy).check_path(file_path, "write");
    if !result.is_allowed() {
        return result;
    }

    if CodeContentCheck::is_script_path(file_path) && !content.is_empty() {
        let result = CodeContentCheck::new(workspace, policy).check_content(content, file_path);
        if !result.is_allowed() {
            return result;
        }
    }

    CheckResult::allow(HANDLER_NAME)
}

pub fn handle_notebook_edit(
    tool_input: &Map<String, Value>,
    workspace: &Workspace,
    policy: &Policy,
) -> CheckResult {
    let notebook_path = get_str(tool_input, "notebook_path");
    let new_source = get_str(tool_input, "new_source");
    let cell_type = get_str(tool_input, "cell_type");
    if notebook_path.is_empty() {
        return CheckResult::allow(HANDLER_NAME);
    }

    let result = DirectoryCheck::new(workspace).check_path(notebook_path, "write");
    if !result.is_allowed() {
        return result;
    }

    let result = SecretsCheck::new(workspace, policy).check_path(notebook_path, "write");
    if !result.is_allowed() {
        return result;
    }

    if cell_type == "code" && !new_source.is_empty() {
        let label = format!("{notebook_path} (cell)");
        let result = CodeContentCheck::new(workspace, policy).check_content(new_source, &label);
        if !result.is_allowed() {
            return result;
        }
    }

    CheckResult::allow(HANDLER_NAME)
}
