//! Glob and Grep handlers.
//!
//! Only the `path` slot is boundary-checked; the `pattern` is a search
//! expression, not a path, except when Glob is given no path and an
//! absolute pattern, which effectively targets that directory.

use crate::checks::Check;
use crate::checks::CheckResult;
use crate::checks::directory::DirectoryCheck;
use crate::checks::secrets::SecretsCheck;
use crate::config::Policy;
use crate::handlers::get_str;
use crate::paths::{Workspace, expand_path};
use serde_json::{Map, Value};

const HANDLER_NAME: &str = "search_handler";

pub fn handle(
    tool_input: &Map<String, Value>,
    workspace: &Workspace,
    policy: &Policy,
) -> CheckResult {
    let mut path = get_str(tool_input, "path").to_string();

    // An absolute pattern with no path targets that directory outright
    // (`pattern="/etc/*"`, `pattern="~/Documents/**"`).
    if path.is_empty() {
        let pattern = get_str(tool_input, "pattern");
        if !pattern.is_empty() {
            let expanded = expand_path(pattern);
            if expanded.starts_with('/') {
                path = expanded;
            }
        }
    }

    // No path: the search runs over the working directory.
    if path.is_empty() {
        return CheckResult::allow(HANDLER_NAME);
    }

    let result = DirectoryCheck::new(workspace).check_path(&path, "find");
    if !result.is_allowed() {
        return result;
    }

    SecretsCheck::new(workspace, policy).check_path(&path, "read")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::Decision;

    fn fixture() -> (tempfile::TempDir, Workspace, Policy) {
        let dir = tempfile::tempdir().unwrap();
        let policy = Policy::default();
        let ws = Workspace::rooted(dir.path(), &policy);
        (dir, ws, policy)
    }

    fn input(pairs: &[(&str, &str)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), Value::String((*v).to_string())))
            .collect()
    }

    #[test]
    fn search_without_path_allows() {
        let (_dir, ws, policy) = fixture();
        assert!(handle(&input(&[("pattern", "*.rs")]), &ws, &policy).is_allowed());
    }

    #[test]
    fn env_as_pattern_with_in_project_path_allows() {
        let (_dir, ws, policy) = fixture();
        let result = handle(
            &input(&[("pattern", ".env"), ("path", "README.md")]),
            &ws,
            &policy,
        );
        assert!(result.is_allowed());
    }

    #[test]
    fn outside_path_denies() {
        let (_dir, ws, policy) = fixture();
        let result = handle(&input(&[("path", "/etc")]), &ws, &policy);
        assert_eq!(result.decision, Decision::Deny);
    }

    #[test]
    fn absolute_pattern_without_path_is_treated_as_path() {
        let (_dir, ws, policy) = fixture();
        let result = handle(&input(&[("pattern", "/etc/*")]), &ws, &policy);
        assert_eq!(result.decision, Decision::Deny);
    }

    #[test]
    fn searching_env_file_denies() {
        let (_dir, ws, policy) = fixture();
        let result = handle(&input(&[("path", ".env")]), &ws, &policy);
        assert_eq!(result.decision, Decision::Deny);
        assert_eq!(result.check_name, "secrets_check");
    }
}
