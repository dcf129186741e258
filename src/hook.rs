//! Hook protocol handling.
//!
//! Reads the host's `PreToolUse` JSON envelope from stdin and writes the
//! permission decision to stdout. Nothing is written for an allow; the
//! process always exits 0 so the host keeps processing the JSON.
//!
//! The internal `ask` decision is elevated to `deny` here, at the single
//! emission boundary: the target environment auto-approves `ask`, which
//! would make it indistinguishable from allow, so the only meaningful
//! signal is a deny that tells the agent to hand the command to the user.

use crate::checks::{CheckResult, Decision};
use crate::config::LoggingPolicy;
use chrono::{Local, SecondsFormat, Utc};
use colored::Colorize;
use fancy_regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::io::{self, IsTerminal, Read, Write};
use std::path::PathBuf;
use std::sync::LazyLock;

/// Upper bound on envelope size; protects against a runaway host.
pub const MAX_INPUT_BYTES: usize = 10 * 1024 * 1024;

/// Values logged are cut to this length before masking.
const MAX_LOGGED_VALUE: usize = 200;

/// Input envelope from the host's `PreToolUse` hook.
#[derive(Debug, Deserialize)]
pub struct HookInput {
    pub tool_name: Option<String>,
    pub tool_input: Option<Map<String, Value>>,
}

/// Output envelope, emitted only for non-allow decisions.
#[derive(Debug, Serialize)]
pub struct HookOutput {
    #[serde(rename = "permissionDecision")]
    pub permission_decision: &'static str,
    pub message: String,
}

/// Error reading or parsing the input envelope.
#[derive(Debug)]
pub enum HookReadError {
    Io(io::Error),
    InputTooLarge(usize),
    Json(serde_json::Error),
}

/// Read and parse the hook envelope from stdin.
///
/// # Errors
///
/// [`HookReadError::Io`] when stdin cannot be read, [`HookReadError::Json`]
/// when the input is not valid envelope JSON, [`HookReadError::InputTooLarge`]
/// when the input exceeds `max_bytes`.
pub fn read_hook_input(max_bytes: usize) -> Result<HookInput, HookReadError> {
    let mut input = String::with_capacity(256);
    {
        let stdin = io::stdin();
        // Read up to limit + 1 to detect overflow.
        let mut handle = stdin.lock().take(max_bytes as u64 + 1);
        handle
            .read_to_string(&mut input)
            .map_err(HookReadError::Io)?;
    }

    if input.len() > max_bytes {
        return Err(HookReadError::InputTooLarge(input.len()));
    }

    serde_json::from_str(&input).map_err(HookReadError::Json)
}

/// Disable colored stderr output when it would not be seen by a terminal.
pub fn configure_colors() {
    if std::env::var_os("NO_COLOR").is_some() || std::env::var_os("PTG_NO_COLOR").is_some() {
        colored::control::set_override(false);
        return;
    }
    if !io::stderr().is_terminal() {
        colored::control::set_override(false);
    }
}

/// Format the outgoing message for a non-allow result, applying the ask
/// elevation.
#[must_use]
pub fn format_decision_message(result: &CheckResult) -> String {
    match result.decision {
        Decision::Deny => format!("BLOCKED: {}\nGuidance: {}", result.reason, result.guidance),
        Decision::Ask => format!(
            "CONFIRM: {}\nGuidance: {}\n\
             This operation requires user confirmation, which the current \
             session cannot collect. Surface the exact command to the user \
             and have them run it themselves.",
            result.reason, result.guidance
        ),
        Decision::Allow => String::new(),
    }
}

/// Write the decision JSON to stdout and a human notice to stderr.
/// Allow results produce no output at all.
pub fn emit_decision(result: &CheckResult) {
    if result.is_allowed() {
        return;
    }

    let output = HookOutput {
        // Ask is elevated: the emitted decision is always deny.
        permission_decision: "deny",
        message: format_decision_message(result),
    };

    let stdout = io::stdout();
    let mut handle = stdout.lock();
    let _ = serde_json::to_writer(&mut handle, &output);
    let _ = writeln!(handle);

    print_stderr_notice(result);
}

fn print_stderr_notice(result: &CheckResult) {
    let stderr = io::stderr();
    let mut handle = stderr.lock();
    let _ = writeln!(
        handle,
        "{} {}",
        "guardian blocked:".red().bold(),
        result.reason
    );
    if !result.guidance.is_empty() {
        let _ = writeln!(handle, "  {} {}", "guidance:".bright_black(), result.guidance);
    }
    let _ = writeln!(handle, "  {} {}", "check:".bright_black(), result.check_name);
}

/// File logger driven by the `logging` policy group. Failures here never
/// influence the decision.
pub struct Logger {
    policy: LoggingPolicy,
    directory: Option<PathBuf>,
}

impl Logger {
    #[must_use]
    pub fn from_policy(policy: &LoggingPolicy) -> Self {
        let directory = if policy.enabled && !policy.log_directory.is_empty() {
            Some(PathBuf::from(crate::paths::expand_path(
                &policy.log_directory,
            )))
        } else {
            None
        };
        Self {
            policy: policy.clone(),
            directory,
        }
    }

    /// Log one tool call, sanitised.
    pub fn log_call(&self, tool_name: &str, tool_input: &Map<String, Value>) {
        if !self.policy.log_all_calls {
            return;
        }
        self.append(&format!(
            "[CALL] {tool_name} {}",
            sanitize_tool_input(tool_input)
        ));
    }

    /// Log a non-allow decision.
    pub fn log_blocked(&self, tool_name: &str, result: &CheckResult) {
        if !self.policy.log_blocked {
            return;
        }
        self.append(&format!(
            "[BLOCK] {tool_name} {}: {}",
            result.check_name, result.reason
        ));
    }

    /// Log an envelope problem at debug level.
    pub fn log_debug(&self, message: &str) {
        self.append(&format!("[DEBUG] {message}"));
    }

    fn append(&self, line: &str) {
        let Some(dir) = &self.directory else {
            return;
        };
        if std::fs::create_dir_all(dir).is_err() {
            return;
        }

        self.prune_old_logs(dir);

        let file_name = format!("guardian-{}.log", Local::now().format("%Y-%m-%d"));
        let path = dir.join(file_name);

        // Stop appending once today's file outgrows the configured cap.
        if let Ok(meta) = std::fs::metadata(&path) {
            if meta.len() > self.policy.max_log_size_mb.saturating_mul(1024 * 1024) {
                return;
            }
        }

        let Ok(mut file) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
        else {
            return;
        };
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let _ = writeln!(file, "[{timestamp}] {line}");
    }

    fn prune_old_logs(&self, dir: &std::path::Path) {
        if self.policy.max_log_files == 0 {
            return;
        }
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        let mut logs: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("guardian-") && n.ends_with(".log"))
            })
            .collect();
        if logs.len() <= self.policy.max_log_files {
            return;
        }
        // Date-stamped names sort chronologically.
        logs.sort();
        let excess = logs.len() - self.policy.max_log_files;
        for path in logs.into_iter().take(excess) {
            let _ = std::fs::remove_file(path);
        }
    }
}

static SECRET_VALUE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)(token|secret|password|passwd|api[_-]?key|authorization|bearer)(['"]?\s*[=:]\s*)\S+"#,
    )
    .ok()
});

/// Compact, safe rendering of tool input for the log: values truncated to
/// 200 characters, credential-shaped assignments masked.
#[must_use]
pub fn sanitize_tool_input(tool_input: &Map<String, Value>) -> String {
    let mut parts: Vec<String> = Vec::with_capacity(tool_input.len());
    for (key, value) in tool_input {
        let rendered = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let truncated = truncate_chars(&rendered, MAX_LOGGED_VALUE);
        let masked = mask_secrets(&truncated);
        parts.push(format!("{key}={masked:?}"));
    }
    if parts.is_empty() {
        "{}".to_string()
    } else {
        format!("{{{}}}", parts.join(", "))
    }
}

fn truncate_chars(value: &str, max: usize) -> String {
    if value.chars().count() <= max {
        return value.to_string();
    }
    let cut: String = value.chars().take(max).collect();
    format!("{cut}...")
}

fn mask_secrets(value: &str) -> String {
    match SECRET_VALUE.as_ref() {
        Some(re) => re.replace_all(value, "$1$2***").into_owned(),
        None => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input_map(pairs: &[(&str, &str)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), Value::String((*v).to_string())))
            .collect()
    }

    #[test]
    fn parses_valid_envelope() {
        let json = r#"{"tool_name":"Bash","tool_input":{"command":"git status"}}"#;
        let input: HookInput = serde_json::from_str(json).unwrap();
        assert_eq!(input.tool_name.as_deref(), Some("Bash"));
        let tool_input = input.tool_input.unwrap();
        assert_eq!(tool_input.get("command").unwrap(), "git status");
    }

    #[test]
    fn tolerates_missing_fields() {
        let input: HookInput = serde_json::from_str("{}").unwrap();
        assert!(input.tool_name.is_none());
        assert!(input.tool_input.is_none());
    }

    #[test]
    fn deny_message_carries_reason_and_guidance() {
        let result = CheckResult::deny("git_check", "force push", "use --force-with-lease");
        let message = format_decision_message(&result);
        assert!(message.starts_with("BLOCKED: force push"));
        assert!(message.contains("Guidance: use --force-with-lease"));
    }

    #[test]
    fn ask_elevates_with_user_instruction() {
        let result = CheckResult::ask("git_check", "needs confirmation", "stash first");
        let message = format_decision_message(&result);
        assert!(message.starts_with("CONFIRM: needs confirmation"));
        assert!(message.contains("run it themselves"));
    }

    #[test]
    fn sanitize_truncates_long_values() {
        let long = "x".repeat(500);
        let rendered = sanitize_tool_input(&input_map(&[("content", &long)]));
        assert!(rendered.len() < 300);
        assert!(rendered.contains("..."));
    }

    #[test]
    fn sanitize_masks_credentials() {
        let rendered =
            sanitize_tool_input(&input_map(&[("command", "export API_KEY=sk-12345 && run")]));
        assert!(!rendered.contains("sk-12345"));
        assert!(rendered.contains("***"));
    }

    #[test]
    fn logger_writes_dated_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut policy = LoggingPolicy::default();
        policy.log_directory = dir.path().to_string_lossy().into_owned();

        let logger = Logger::from_policy(&policy);
        logger.log_call("Bash", &input_map(&[("command", "ls")]));

        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .collect();
        assert_eq!(entries.len(), 1);
        let name = entries[0].file_name().to_string_lossy().into_owned();
        assert!(name.starts_with("guardian-") && name.ends_with(".log"));

        let content = std::fs::read_to_string(entries[0].path()).unwrap();
        assert!(content.contains("[CALL] Bash"));
    }

    #[test]
    fn disabled_logger_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut policy = LoggingPolicy::default();
        policy.enabled = false;
        policy.log_directory = dir.path().to_string_lossy().into_owned();

        let logger = Logger::from_policy(&policy);
        logger.log_call("Bash", &Map::new());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
