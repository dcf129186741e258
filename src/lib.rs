//! Pre-tool-use security guardian for Claude Code.
//!
//! Invoked synchronously by the host's `PreToolUse` hook before a privileged
//! tool call runs. The guardian reads one JSON envelope describing the
//! intended operation and classifies it as allow, ask (elevated to deny at
//! the boundary), or deny, driven by a single declarative YAML policy.
//!
//! It never executes the inspected command, never prompts, and never blocks
//! the host because of its own failures: an unreadable envelope or a broken
//! policy file resolves to allow.
//!
//! Module map:
//! - [`bash`]: command line parsing (tree-sitter primary, quote-aware fallback)
//! - [`paths`]: canonicalisation, boundary queries, symlink-escape detection
//! - [`config`]: the policy schema and its compiled-in defaults
//! - [`checks`]: the nine cooperating security checks
//! - [`handlers`]: per-tool check pipelines
//! - [`ledger`]: the downloaded-file ledger
//! - [`hook`]: envelope I/O, logging
//! - [`engine`]: dispatch and the allow-on-error policy

pub mod bash;
pub mod checks;
pub mod config;
pub mod engine;
pub mod handlers;
pub mod hook;
pub mod ledger;
pub mod paths;
