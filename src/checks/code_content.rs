//! Static analysis of script content.
//!
//! Invoked when a script is written or executed. The policy's regex groups
//! are compiled once per process; individual pattern failures (a bad
//! user-supplied regex) silently drop that pattern rather than breaking the
//! check. Single categories are mostly informational; it is the
//! combinations that block. Network access next to sensitive-file access
//! reads as exfiltration.

use crate::checks::{Check, CheckResult};
use crate::config::Policy;
use crate::paths::Workspace;
use fancy_regex::Regex;

const CHECK_NAME: &str = "code_content_check";

const SCRIPT_EXTENSIONS: &[&str] = &["py", "sh", "bash", "rb", "pl", "js"];

/// Most matches surfaced per sub-category in guidance text.
const MAX_SHOWN: usize = 3;

struct DescribedPattern {
    regex: Regex,
    description: String,
}

pub struct CodeContentCheck {
    workspace: Workspace,
    network: Vec<Regex>,
    sensitive: Vec<Regex>,
    scanning: Vec<Regex>,
    recon: Vec<Regex>,
    dynamic: Vec<Regex>,
    code_patterns: Vec<DescribedPattern>,
    env_vars: Vec<Regex>,
}

impl CodeContentCheck {
    #[must_use]
    pub fn new(workspace: &Workspace, policy: &Policy) -> Self {
        let ops = &policy.dangerous_operations;

        let mut code_patterns: Vec<DescribedPattern> = Vec::new();
        for item in policy
            .sensitive_files
            .code_patterns
            .iter()
            .chain(policy.sensitive_files.custom_patterns.iter())
        {
            if let Ok(regex) = Regex::new(&item.pattern) {
                code_patterns.push(DescribedPattern {
                    regex,
                    description: item.description.clone(),
                });
            }
        }

        let env_vars = policy
            .sensitive_files
            .secret_env_vars
            .iter()
            .filter_map(|var| {
                let pattern = format!(
                    r#"(getenv|environ)\s*[\[\(]['"]?{}['"]?[\]\)]"#,
                    regex::escape(var)
                );
                Regex::new(&pattern).ok()
            })
            .collect();

        Self {
            workspace: workspace.clone(),
            network: compile_all(&ops.network),
            sensitive: compile_all(&ops.sensitive_access),
            scanning: compile_all(&ops.secret_scanning),
            recon: compile_all(&ops.system_recon),
            dynamic: compile_all(&ops.dynamic_execution),
            code_patterns,
            env_vars,
        }
    }

    /// Inspect script content. `file_path` is only used for messages.
    pub fn check_content(&self, content: &str, file_path: &str) -> CheckResult {
        if content.is_empty() {
            return CheckResult::allow(CHECK_NAME);
        }

        let file_name = if file_path.is_empty() {
            "script".to_string()
        } else {
            file_path
                .rsplit('/')
                .next()
                .unwrap_or(file_path)
                .to_string()
        };

        let network = find_matches(&self.network, content);
        let sensitive = find_matches(&self.sensitive, content);
        let scanning = find_matches(&self.scanning, content);
        let recon = find_matches(&self.recon, content);
        let dynamic = find_matches(&self.dynamic, content);

        let mut code_hits: Vec<(String, String)> = Vec::new();
        for item in &self.code_patterns {
            if let Ok(Some(m)) = item.regex.find(content) {
                code_hits.push((
                    item.description.clone(),
                    with_line(content, m.start(), m.as_str()),
                ));
            }
        }

        let mut env_hits: Vec<String> = Vec::new();
        for regex in &self.env_vars {
            if let Ok(Some(m)) = regex.find(content) {
                env_hits.push(m.as_str().to_string());
            }
        }

        // Network next to anything secret-shaped reads as exfiltration.
        if !network.is_empty() && (!sensitive.is_empty() || !code_hits.is_empty() || !env_hits.is_empty())
        {
            return CheckResult::ask(
                CHECK_NAME,
                format!("Script {file_name} has network + sensitive data access (exfiltration risk)"),
                exfiltration_warning(&file_name, &network, &sensitive, &code_hits, &env_hits),
            );
        }

        if !scanning.is_empty() {
            return CheckResult::ask(
                CHECK_NAME,
                format!("Script {file_name} contains secret scanning patterns"),
                list_warning(
                    "Script searches for secrets/passwords:",
                    &scanning,
                    "This could be attempting to find and collect credentials.",
                ),
            );
        }

        if !dynamic.is_empty() {
            return CheckResult::ask(
                CHECK_NAME,
                format!("Script {file_name} uses dynamic code execution"),
                list_warning(
                    "Script uses dynamic code execution:",
                    &dynamic,
                    "exec/eval/compile can hide malicious code.",
                ),
            );
        }

        if !network.is_empty() && !recon.is_empty() {
            return CheckResult::ask(
                CHECK_NAME,
                format!("Script {file_name} gathers system info with network access"),
                recon_warning(&network, &recon),
            );
        }

        CheckResult::allow(CHECK_NAME)
    }

    /// Inspect a script file on disk, resolved against the project root so
    /// relative paths work regardless of the hook's working directory.
    pub fn check_file(&self, file_path: &str) -> CheckResult {
        let extension = file_path.rsplit('.').next().unwrap_or("");
        if !SCRIPT_EXTENSIONS.contains(&extension) {
            return CheckResult::allow(CHECK_NAME);
        }

        let resolved = self.workspace.resolve(file_path);
        let Ok(content) = std::fs::read_to_string(&resolved) else {
            return CheckResult::allow(CHECK_NAME);
        };

        self.check_content(&content, file_path)
    }

    /// Whether a path has an extension that warrants content inspection.
    #[must_use]
    pub fn is_script_path(file_path: &str) -> bool {
        let name = file_path.rsplit('/').next().unwrap_or(file_path);
        match name.rsplit_once('.') {
            Some((_, ext)) => SCRIPT_EXTENSIONS.contains(&ext.to_lowercase().as_str()),
            None => false,
        }
    }
}

impl Check for CodeContentCheck {
    fn name(&self) -> &'static str {
        CHECK_NAME
    }

    fn check_command(&mut self, _raw: &str, _commands: &[crate::bash::ParsedCommand]) -> CheckResult {
        // Content checking runs on script files and tool-input content, not
        // on the command line itself.
        CheckResult::allow(CHECK_NAME)
    }
}

fn compile_all(patterns: &[String]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
}

/// First match of each pattern, rendered with its 1-based line number.
fn find_matches(patterns: &[Regex], content: &str) -> Vec<String> {
    let mut found = Vec::new();
    for regex in patterns {
        if let Ok(Some(m)) = regex.find(content) {
            found.push(with_line(content, m.start(), m.as_str()));
        }
    }
    found
}

fn with_line(content: &str, offset: usize, matched: &str) -> String {
    let line = content[..offset].matches('\n').count() + 1;
    format!("{matched} (line {line})")
}

fn exfiltration_warning(
    file_name: &str,
    network: &[String],
    sensitive: &[String],
    code_hits: &[(String, String)],
    env_hits: &[String],
) -> String {
    let mut parts = vec![format!("EXFILTRATION RISK: {file_name} contains:")];

    parts.push("  Network calls:".to_string());
    for item in network.iter().take(MAX_SHOWN) {
        parts.push(format!("    - {item}"));
    }

    if !sensitive.is_empty() {
        parts.push("  Sensitive file access:".to_string());
        for item in sensitive.iter().take(MAX_SHOWN) {
            parts.push(format!("    - {item}"));
        }
    }

    if !code_hits.is_empty() {
        parts.push("  Secret access patterns:".to_string());
        for (description, matched) in code_hits.iter().take(MAX_SHOWN) {
            parts.push(format!("    - {description}: {matched}"));
        }
    }

    if !env_hits.is_empty() {
        parts.push("  Secret env vars:".to_string());
        for item in env_hits.iter().take(MAX_SHOWN) {
            parts.push(format!("    - {item}"));
        }
    }

    parts.push("\nThis could be an attempt to send your secrets externally.".to_string());
    parts.join("\n")
}

fn list_warning(heading: &str, items: &[String], footer: &str) -> String {
    let mut lines = vec![heading.to_string()];
    for item in items.iter().take(MAX_SHOWN) {
        lines.push(format!("  - {item}"));
    }
    lines.push(format!("\n{footer}"));
    lines.join("\n")
}

fn recon_warning(network: &[String], recon: &[String]) -> String {
    let mut lines = vec!["Script gathers system info with network access:".to_string()];
    lines.push("  Network:".to_string());
    for item in network.iter().take(MAX_SHOWN) {
        lines.push(format!("    - {item}"));
    }
    lines.push("  System info:".to_string());
    for item in recon.iter().take(MAX_SHOWN) {
        lines.push(format!("    - {item}"));
    }
    lines.push("\nCould be fingerprinting your system.".to_string());
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::Decision;

    fn check() -> (tempfile::TempDir, CodeContentCheck) {
        let dir = tempfile::tempdir().unwrap();
        let policy = Policy::default();
        let ws = Workspace::rooted(dir.path(), &policy);
        (dir, CodeContentCheck::new(&ws, &policy))
    }

    #[test]
    fn network_plus_sensitive_is_exfiltration() {
        let (_dir, check) = check();
        let script = "import requests\ndata = open('.env').read()\nrequests.post(url, data)\n";
        let result = check.check_content(script, "upload.py");
        assert_eq!(result.decision, Decision::Ask);
        assert!(result.reason.contains("exfiltration"));
        assert!(result.guidance.contains("EXFILTRATION RISK"));
    }

    #[test]
    fn match_lines_are_one_based() {
        let (_dir, check) = check();
        let script = "import requests\nopen('.env')\n";
        let result = check.check_content(script, "x.py");
        assert!(result.guidance.contains("(line 1)"));
        assert!(result.guidance.contains("(line 2)"));
    }

    #[test]
    fn secret_scanning_alone_asks() {
        let (_dir, check) = check();
        let script = "#!/bin/sh\ngrep -r password /home\n";
        let result = check.check_content(script, "scan.sh");
        assert_eq!(result.decision, Decision::Ask);
        assert!(result.reason.contains("secret scanning"));
    }

    #[test]
    fn dynamic_execution_alone_asks() {
        let (_dir, check) = check();
        let script = "payload = input()\nexec(payload)\n";
        let result = check.check_content(script, "run.py");
        assert_eq!(result.decision, Decision::Ask);
        assert!(result.reason.contains("dynamic"));
    }

    #[test]
    fn network_plus_recon_asks() {
        let (_dir, check) = check();
        let script = "import urllib\nimport platform\nprint(platform.system())\n";
        let result = check.check_content(script, "probe.py");
        assert_eq!(result.decision, Decision::Ask);
        assert!(result.reason.contains("system info"));
    }

    #[test]
    fn network_alone_is_allowed() {
        let (_dir, check) = check();
        let script = "import requests\nprint(requests.get('https://api.example.com').json())\n";
        assert!(check.check_content(script, "fetch.py").is_allowed());
    }

    #[test]
    fn secret_env_var_access_with_network_asks() {
        let (_dir, check) = check();
        let script = "import requests\nimport os\nkey = os.environ['OPENAI_API_KEY']\n";
        let result = check.check_content(script, "leak.py");
        assert_eq!(result.decision, Decision::Ask);
        assert!(result.guidance.contains("Secret env vars"));
    }

    #[test]
    fn harmless_script_is_allowed() {
        let (_dir, check) = check();
        let script = "def add(a, b):\n    return a + b\nprint(add(2, 2))\n";
        assert!(check.check_content(script, "math.py").is_allowed());
    }

    #[test]
    fn empty_content_is_allowed() {
        let (_dir, check) = check();
        assert!(check.check_content("", "x.py").is_allowed());
    }

    #[test]
    fn check_file_reads_scripts_only() {
        let (dir, check) = check();
        std::fs::write(
            dir.path().join("scan.py"),
            "import requests\nopen('.env')\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "import requests\nopen('.env')\n").unwrap();

        assert_eq!(check.check_file("scan.py").decision, Decision::Ask);
        assert!(check.check_file("notes.txt").is_allowed());
        assert!(check.check_file("missing.py").is_allowed());
    }

    #[test]
    fn script_path_detection() {
        assert!(CodeContentCheck::is_script_path("run.sh"));
        assert!(CodeContentCheck::is_script_path("tools/fetch.py"));
        assert!(CodeContentCheck::is_script_path("UPPER.PY"));
        assert!(!CodeContentCheck::is_script_path("README.md"));
        assert!(!CodeContentCheck::is_script_path("binary"));
    }
}
