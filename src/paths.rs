//! Path resolution and boundary queries.
//!
//! Everything here is careful about symlinks: the project root and every
//! candidate path are canonicalised before comparison, and symlink escape is
//! detected component by component so that a link *inside* the project
//! pointing outside is distinguished from a path that was simply outside to
//! begin with.

use crate::config::{ENV_PROJECT_DIR, Policy, expand_env};
use std::env;
use std::path::{Component, Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::time::{Duration, Instant};

/// Wall-clock bound for every subprocess the guardian spawns.
pub const SUBPROCESS_TIMEOUT: Duration = Duration::from_secs(5);

/// Environment markers that identify a CI environment.
const CI_ENV_VARS: &[&str] = &[
    "CI",
    "GITHUB_ACTIONS",
    "GITLAB_CI",
    "JENKINS_URL",
    "CIRCLECI",
    "TRAVIS",
];

/// The directory boundaries a single invocation operates under.
///
/// Computed once per process and threaded through handlers and checks, so
/// tests can pin the root to a fixture directory instead of the process
/// environment.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub project_root: PathBuf,
    pub allowed_paths: Vec<PathBuf>,
}

impl Workspace {
    /// Detect the workspace from policy and environment.
    pub fn detect(policy: &Policy) -> Self {
        let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let project_root = if policy.directories.project_root.is_empty() {
            project_root()
        } else {
            resolve(&policy.directories.project_root, &cwd)
        };
        Self::with_root(project_root, policy, &cwd)
    }

    /// Build a workspace over an explicit root. Used by tests and by hosts
    /// that pass the root through policy.
    pub fn rooted(root: impl Into<PathBuf>, policy: &Policy) -> Self {
        let root: PathBuf = root.into();
        let cwd = root.clone();
        Self::with_root(canonicalize_or_clean(&root), policy, &cwd)
    }

    fn with_root(project_root: PathBuf, policy: &Policy, base: &Path) -> Self {
        let allowed_paths = policy
            .directories
            .allowed_paths
            .iter()
            .map(|p| resolve(p, base))
            .collect();
        Self {
            project_root,
            allowed_paths,
        }
    }

    /// Resolve a user-supplied path against the project root.
    pub fn resolve(&self, path: &str) -> PathBuf {
        resolve(path, &self.project_root)
    }

    /// True iff `resolved` lies within the project root or an allowed root.
    pub fn contains(&self, resolved: &Path) -> bool {
        if resolved.starts_with(&self.project_root) {
            return true;
        }
        self.allowed_paths.iter().any(|root| resolved.starts_with(root))
    }

    /// Project-relative form of `resolved`, or `None` when outside.
    pub fn relative(&self, resolved: &Path) -> Option<PathBuf> {
        resolved
            .strip_prefix(&self.project_root)
            .ok()
            .map(Path::to_path_buf)
    }

    /// True iff the original spelling of `path` escapes the project through
    /// an in-project symlink.
    pub fn is_symlink_escape(&self, path: &str) -> bool {
        is_symlink_escape(path, &self.project_root, &self.project_root)
    }
}

/// Detect the project root: the host's `CLAUDE_PROJECT_DIR` hint if set,
/// otherwise the nearest ancestor of the working directory containing
/// `.git`, otherwise the working directory itself. Symlinks resolved.
pub fn project_root() -> PathBuf {
    if let Ok(env_root) = env::var(ENV_PROJECT_DIR) {
        if !env_root.is_empty() {
            return canonicalize_or_clean(Path::new(&env_root));
        }
    }

    let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

    let mut current = cwd.as_path();
    loop {
        if current.join(".git").exists() {
            return canonicalize_or_clean(current);
        }
        match current.parent() {
            Some(parent) => current = parent,
            None => break,
        }
    }

    canonicalize_or_clean(&cwd)
}

/// Resolve a path string to an absolute canonical path.
///
/// Expands `~` and environment variables, joins relative paths onto `base`,
/// then resolves symlinks. If symlink resolution fails (the path does not
/// exist yet), the lexically cleaned path is returned instead.
pub fn resolve(path_str: &str, base: &Path) -> PathBuf {
    let expanded = expand_path(path_str);
    let expanded = Path::new(&expanded);

    let joined = if expanded.is_absolute() {
        expanded.to_path_buf()
    } else {
        canonicalize_or_clean(base).join(expanded)
    };

    canonicalize_or_clean(&joined)
}

/// Expand a leading `~` and any environment variables in a path string.
pub fn expand_path(path: &str) -> String {
    let expanded = if let Some(rest) = path.strip_prefix("~/") {
        match dirs::home_dir() {
            Some(home) => home.join(rest).to_string_lossy().into_owned(),
            None => path.to_string(),
        }
    } else if path == "~" {
        match dirs::home_dir() {
            Some(home) => home.to_string_lossy().into_owned(),
            None => path.to_string(),
        }
    } else {
        path.to_string()
    };

    expand_env(&expanded)
}

/// True iff `path` equals one of `roots` or is a proper descendant of one.
pub fn is_within(path: &Path, roots: &[PathBuf]) -> bool {
    roots.iter().any(|root| path.starts_with(root))
}

/// Detect a symlink escape: the canonical target of `path_str` lies outside
/// the project *and* some component of the original spelling, once inside
/// the project, is a symlink whose target is outside. A path that never
/// entered the project is not an escape.
pub fn is_symlink_escape(path_str: &str, project_root: &Path, base: &Path) -> bool {
    let project = canonicalize_or_clean(project_root);

    let resolved = resolve(path_str, base);
    if resolved.starts_with(&project) {
        return false;
    }

    // Rebuild the original spelling without following links, then walk it
    // component by component looking for an in-project link pointing out.
    let expanded = expand_path(path_str);
    let expanded = Path::new(&expanded);
    let original = if expanded.is_absolute() {
        expanded.to_path_buf()
    } else {
        base.join(expanded)
    };
    let original = lexical_clean(&original);

    let mut inside_project = false;
    let mut probe = PathBuf::new();

    for component in original.components() {
        probe.push(component.as_os_str());

        if let Ok(canonical) = probe.canonicalize() {
            if canonical.starts_with(&project) {
                inside_project = true;
            }
        }

        let Ok(meta) = std::fs::symlink_metadata(&probe) else {
            continue;
        };
        if meta.file_type().is_symlink() && inside_project {
            if let Ok(target) = probe.canonicalize() {
                if !target.starts_with(&project) {
                    return true;
                }
            }
        }
    }

    false
}

/// True iff the lexically cleaned `target` climbs out of its base with `..`.
pub fn has_traversal(target: &str) -> bool {
    let cleaned = lexical_clean(Path::new(target));
    cleaned.components().next() == Some(Component::ParentDir)
}

/// Query the local VCS whether `path` is tracked. Bounded at
/// [`SUBPROCESS_TIMEOUT`]; any failure means "not tracked".
pub fn is_git_tracked(path: &Path, project_root: &Path) -> bool {
    let mut cmd = Command::new("git");
    cmd.arg("ls-files")
        .arg("--error-unmatch")
        .arg(path)
        .current_dir(project_root)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    match run_with_timeout(cmd, SUBPROCESS_TIMEOUT) {
        Some(output) => output.status.success(),
        None => false,
    }
}

/// True iff the process runs under a recognised CI system.
pub fn is_ci_environment() -> bool {
    CI_ENV_VARS
        .iter()
        .any(|var| env::var(var).map(|v| !v.is_empty()).unwrap_or(false))
}

/// Run a command with a wall-clock bound, killing the child on expiry.
/// Returns `None` on spawn failure or timeout.
pub fn run_with_timeout(mut cmd: Command, timeout: Duration) -> Option<Output> {
    let mut child = cmd.spawn().ok()?;
    let deadline = Instant::now() + timeout;

    loop {
        match child.try_wait() {
            Ok(Some(_)) => return child.wait_with_output().ok(),
            Ok(None) => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    return None;
                }
                std::thread::sleep(Duration::from_millis(25));
            }
            Err(_) => {
                let _ = child.kill();
                let _ = child.wait();
                return None;
            }
        }
    }
}

/// Canonicalise, or fall back to lexical cleaning when the path (or some
/// suffix of it) does not exist.
pub fn canonicalize_or_clean(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| lexical_clean(path))
}

/// Pure-lexical normalisation: drops `.`, folds `..` into its parent where
/// possible, keeps leading `..` on relative paths, drops `..` at the root of
/// absolute paths.
pub fn lexical_clean(path: &Path) -> PathBuf {
    let absolute = path.is_absolute();
    let mut out = PathBuf::new();
    let mut depth = 0usize;

    for component in path.components() {
        match component {
            Component::Prefix(prefix) => out.push(prefix.as_os_str()),
            Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if depth > 0 {
                    out.pop();
                    depth -= 1;
                } else if !absolute {
                    out.push("..");
                }
            }
            Component::Normal(part) => {
                out.push(part);
                depth += 1;
            }
        }
    }

    if out.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        out
    }
}
