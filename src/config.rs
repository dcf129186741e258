//! Policy configuration: schema, compiled-in defaults, YAML overlay.
//!
//! The policy is a single YAML document. Every field is optional; a partial
//! document overlays the compiled-in defaults via `#[serde(default)]`. A
//! missing or malformed file yields the defaults: the guardian never blocks
//! the host because of its own configuration.

use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};

/// Environment variable that overrides the policy file location.
pub const ENV_CONFIG_PATH: &str = "PTG_CONFIG";

/// Environment variable the host sets to point at the project root.
pub const ENV_PROJECT_DIR: &str = "CLAUDE_PROJECT_DIR";

/// Directory boundaries.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DirectoriesPolicy {
    /// Explicit project root; auto-detected when empty.
    pub project_root: String,
    /// Additional roots operations may touch.
    pub allowed_paths: Vec<String>,
}

impl Default for DirectoriesPolicy {
    fn default() -> Self {
        Self {
            project_root: String::new(),
            allowed_paths: Vec::new(),
        }
    }
}

/// Git operation rules. Patterns are `subcommand flag flag ...` strings;
/// flags match as a subset after clustered short flags are expanded.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GitPolicy {
    pub hard_blocked: Vec<String>,
    pub confirm_required: Vec<String>,
    pub allowed: Vec<String>,
    pub ci_auto_allow: Vec<String>,
}

impl Default for GitPolicy {
    fn default() -> Self {
        Self {
            hard_blocked: vec_of(&["push --force"]),
            confirm_required: vec_of(&[
                "push -f",
                "reset --hard",
                "branch -D",
                "clean -fd",
                "reflog expire",
            ]),
            allowed: vec_of(&["push --force-with-lease", "clean -fd --dry-run", "clean -fdn"]),
            ci_auto_allow: vec_of(&["clean -fd", "reset --hard"]),
        }
    }
}

/// Bypass prevention: shells, eval, inline interpreters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BypassPolicy {
    pub blocked_outside_project: Vec<String>,
    pub hard_blocked: Vec<String>,
    pub block_variable_as_command: bool,
    pub block_shell_pipe_targets: Vec<String>,
    pub block_shell_exec_patterns: Vec<String>,
    pub confirm_interpreter_inline_with_network: Vec<String>,
    pub network_patterns: Vec<String>,
    pub obfuscation_patterns: Vec<String>,
    pub rce_patterns_require_network: Vec<String>,
}

impl Default for BypassPolicy {
    fn default() -> Self {
        Self {
            blocked_outside_project: vec_of(&["base64 -d", "xxd -r"]),
            hard_blocked: vec_of(&["eval"]),
            block_variable_as_command: true,
            block_shell_pipe_targets: vec_of(&["sh", "bash", "zsh", "fish"]),
            block_shell_exec_patterns: vec_of(&[
                "sh -c",
                "bash -c",
                "zsh -c",
                "dash -c",
                "ksh -c",
                "ash -c",
                "busybox sh",
                "env -i bash",
                "env -i sh",
            ]),
            confirm_interpreter_inline_with_network: vec_of(&[
                "python -c",
                "python3 -c",
                "perl -e",
                "node -e",
                "ruby -e",
            ]),
            network_patterns: vec_of(&[
                "import requests",
                "import urllib",
                "import http.client",
                "import socket",
                "import httpx",
                "import aiohttp",
                "require('http')",
                "fetch(",
            ]),
            obfuscation_patterns: vec_of(&["importlib.import_module", "__import__"]),
            rce_patterns_require_network: vec_of(&[
                "exec(base64",
                "exec(bytes.fromhex",
                "eval(base64",
            ]),
        }
    }
}

/// Download protection: extension classes and the ledger.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DownloadPolicy {
    pub require_user_download: Vec<String>,
    pub auto_download_but_check_unpack: Vec<String>,
    pub auto_download: Vec<String>,
    pub block_pipe_to_shell: bool,
    pub track_downloaded_executables: bool,
    pub downloaded_files_metadata: String,
    pub detect_binary_by_magic: bool,
    pub git_tracked_allow: bool,
    pub file_command_fallback: bool,
}

impl Default for DownloadPolicy {
    fn default() -> Self {
        Self {
            require_user_download: vec_of(&[
                ".py", ".sh", ".bash", ".rb", ".pl", ".js", ".exe", ".app", ".dmg", ".pkg",
                ".deb", ".bin", ".msi",
            ]),
            auto_download_but_check_unpack: vec_of(&[
                ".tar.gz", ".tgz", ".zip", ".rar", ".7z", ".tar.bz2", ".tar.xz",
            ]),
            auto_download: vec_of(&[
                ".json", ".yaml", ".yml", ".txt", ".csv", ".md", ".xml", ".html",
            ]),
            block_pipe_to_shell: true,
            track_downloaded_executables: true,
            downloaded_files_metadata: ".claude/guardian/.downloaded.json".to_string(),
            detect_binary_by_magic: true,
            git_tracked_allow: true,
            file_command_fallback: true,
        }
    }
}

/// Archive unpacking protection.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UnpackPolicy {
    pub check_extracted_files: bool,
    pub check_archive_path_traversal: bool,
    pub blocked_patterns: Vec<String>,
}

impl Default for UnpackPolicy {
    fn default() -> Self {
        Self {
            check_extracted_files: true,
            check_archive_path_traversal: true,
            blocked_patterns: vec_of(&[
                "tar -C ../",
                "tar --directory=../",
                "tar --one-top-level=../",
                "unzip -d ../",
                "bsdtar -C ../",
                "bsdtar -s",
                "python -m zipfile -e",
                "python3 -m zipfile -e",
            ]),
        }
    }
}

/// Protected paths: modification-forbidden and content-forbidden globs.
/// `no_read_content` entries may start with `!` to carve out exceptions.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProtectedPathsPolicy {
    pub no_modify: Vec<String>,
    pub no_read_content: Vec<String>,
}

impl Default for ProtectedPathsPolicy {
    fn default() -> Self {
        Self {
            no_modify: vec_of(&[
                ".git/**",
                ".claude/settings.json",
                ".claude/settings.local.json",
                ".claude/guardian/**",
            ]),
            no_read_content: vec_of(&["**/.env", "**/.env.*", "!**/.env.example", "!**/.env.template"]),
        }
    }
}

/// A regex plus a human description, used by the code-content check.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CodePattern {
    pub pattern: String,
    pub description: String,
}

impl Default for CodePattern {
    fn default() -> Self {
        Self {
            pattern: String::new(),
            description: String::new(),
        }
    }
}

impl CodePattern {
    fn new(pattern: &str, description: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            description: description.to_string(),
        }
    }
}

/// Sensitive files: read-forbidden globs and code-level probes.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SensitiveFilesPolicy {
    pub forbidden_read: Vec<String>,
    pub code_patterns: Vec<CodePattern>,
    pub secret_env_vars: Vec<String>,
    pub custom_patterns: Vec<CodePattern>,
}

impl Default for SensitiveFilesPolicy {
    fn default() -> Self {
        Self {
            forbidden_read: vec_of(&[
                "**/.env",
                "**/.env.*",
                "!**/.env.example",
                "!**/.env.template",
                "**/secrets.yaml",
                "**/credentials.json",
                "**/*.pem",
                "**/*.key",
                "**/id_rsa*",
                "**/id_ed25519*",
            ]),
            code_patterns: vec![
                CodePattern::new(r#"open\(['"].*\.env"#, "Reading .env file"),
                CodePattern::new(r#"open\(['"].*\.pem"#, "Reading private key"),
                CodePattern::new(r"load_dotenv\(", "Loading .env via dotenv"),
                CodePattern::new(r"\.aws/credentials", "AWS credentials access"),
                CodePattern::new(r"\.netrc", "Netrc file access"),
                CodePattern::new(r"\.npmrc", "NPM config access"),
                CodePattern::new(r"\.pypirc", "PyPI config access"),
            ],
            secret_env_vars: vec_of(&[
                "API_KEY",
                "SECRET_KEY",
                "DATABASE_URL",
                "AWS_ACCESS_KEY_ID",
                "AWS_SECRET_ACCESS_KEY",
                "GITHUB_TOKEN",
                "OPENAI_API_KEY",
                "ANTHROPIC_API_KEY",
                "STRIPE_SECRET_KEY",
                "PRIVATE_KEY",
                "PASSWORD",
                "DB_PASSWORD",
            ]),
            custom_patterns: Vec::new(),
        }
    }
}

/// Dangerous-operation regex groups consumed by the code-content check.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DangerousOpsPolicy {
    pub network: Vec<String>,
    pub sensitive_access: Vec<String>,
    pub secret_scanning: Vec<String>,
    pub system_recon: Vec<String>,
    pub dynamic_execution: Vec<String>,
    pub shell_execution: Vec<String>,
}

impl Default for DangerousOpsPolicy {
    fn default() -> Self {
        Self {
            network: vec_of(&[
                r"import\s+(requests|urllib|httpx|aiohttp)",
                r"from\s+(requests|urllib|httpx)\s",
                r"socket\.",
                r"urlopen\(",
                r"curl\s",
                r"wget\s",
            ]),
            sensitive_access: vec_of(&[
                r"\.env",
                r"/etc/passwd",
                r"~/.ssh",
                r"\.aws/credentials",
                r"\.netrc",
                r"\.npmrc",
                r"\.pypirc",
            ]),
            secret_scanning: vec_of(&[
                r"grep.*password",
                r"grep.*secret",
                r"grep.*token",
                r"grep.*api.key",
                r"find.*\.env",
                r"find.*\.ssh",
                r"find.*\.aws",
                r"glob\(.*\.env",
                r"os\.walk.*password",
                r"re\.search.*password",
                r"re\.findall.*secret",
            ]),
            system_recon: vec_of(&[
                r"os\.environ",
                r"getpass\.getuser",
                r"socket\.gethostname",
                r"platform\.",
                r"subprocess.*whoami",
                r"subprocess.*id\s",
                r"subprocess.*uname",
            ]),
            dynamic_execution: vec_of(&[
                r"exec\(",
                r"eval\(",
                r"compile\(",
                r"__import__\(",
                r"importlib\.import_module",
                r"subprocess\..*shell=True",
            ]),
            shell_execution: vec_of(&[r"subprocess\.", r"os\.system\(", r"os\.popen\("]),
        }
    }
}

/// Logging behavior. Log writes never influence the decision.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingPolicy {
    pub enabled: bool,
    pub log_blocked: bool,
    pub log_all_calls: bool,
    pub log_directory: String,
    pub log_content: bool,
    pub max_log_size_mb: u64,
    pub max_log_files: usize,
}

impl Default for LoggingPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            log_blocked: true,
            log_all_calls: true,
            log_directory: "${HOME}/.claude/logs/pretool-guardian".to_string(),
            log_content: false,
            max_log_size_mb: 10,
            max_log_files: 5,
        }
    }
}

/// The complete policy document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Policy {
    pub directories: DirectoriesPolicy,
    pub git: GitPolicy,
    pub bypass_prevention: BypassPolicy,
    pub download_protection: DownloadPolicy,
    pub unpack_protection: UnpackPolicy,
    pub protected_paths: ProtectedPathsPolicy,
    pub sensitive_files: SensitiveFilesPolicy,
    pub dangerous_operations: DangerousOpsPolicy,
    pub logging: LoggingPolicy,
}

impl Policy {
    /// Load the policy from `path`, overlaying defaults. Any failure (a
    /// missing file, unreadable bytes, malformed YAML) yields the defaults.
    pub fn load(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };
        let Ok(data) = std::fs::read_to_string(path) else {
            return Self::default();
        };
        Self::from_yaml(&data).unwrap_or_default()
    }

    /// Parse a policy from YAML text.
    pub fn from_yaml(data: &str) -> Result<Self, serde_yaml::Error> {
        let mut policy: Self = serde_yaml::from_str(data)?;
        policy.expand_env_vars();
        Ok(policy)
    }

    /// Expand `${VAR}`/`$VAR` in the string fields that hold paths.
    fn expand_env_vars(&mut self) {
        self.directories.project_root = expand_env(&self.directories.project_root);
        for p in &mut self.directories.allowed_paths {
            *p = expand_env(p);
        }
        self.download_protection.downloaded_files_metadata =
            expand_env(&self.download_protection.downloaded_files_metadata);
        self.logging.log_directory = expand_env(&self.logging.log_directory);
    }
}

/// Locate the policy file: `PTG_CONFIG` first, then the project's
/// `.claude/guardian.yaml`, then `guardian.yaml` next to the executable,
/// then the working directory.
pub fn find_policy_path() -> Option<PathBuf> {
    if let Ok(path) = env::var(ENV_CONFIG_PATH) {
        let path = PathBuf::from(path);
        if path.is_file() {
            return Some(path);
        }
    }

    if let Ok(project_dir) = env::var(ENV_PROJECT_DIR) {
        let path = Path::new(&project_dir).join(".claude").join("guardian.yaml");
        if path.is_file() {
            return Some(path);
        }
    }

    if let Ok(exe) = env::current_exe() {
        if let Some(dir) = exe.parent() {
            let path = dir.join("guardian.yaml");
            if path.is_file() {
                return Some(path);
            }
        }
    }

    for candidate in ["guardian.yaml", ".claude/guardian.yaml"] {
        let path = PathBuf::from(candidate);
        if path.is_file() {
            return Some(path);
        }
    }

    None
}

/// Expand `${VAR}` and `$VAR` references from the process environment.
/// Unknown variables expand to the empty string.
pub fn expand_env(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos + 1..];

        if let Some(braced) = rest.strip_prefix('{') {
            if let Some(end) = braced.find('}') {
                if let Ok(val) = env::var(&braced[..end]) {
                    out.push_str(&val);
                }
                rest = &braced[end + 1..];
                continue;
            }
            out.push('$');
            continue;
        }

        let end = rest
            .find(|c: char| !c.is_ascii_alphanumeric() && c != '_')
            .unwrap_or(rest.len());
        if end == 0 {
            out.push('$');
        } else {
            if let Ok(val) = env::var(&rest[..end]) {
                out.push_str(&val);
            }
            rest = &rest[end..];
        }
    }

    out.push_str(rest);
    out
}

fn vec_of(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}
