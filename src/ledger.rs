//! Durable record of files fetched by download commands.
//!
//! The ledger is the guardian's only mutable state: a JSON object mapping
//! canonical file paths to download metadata. The download check records
//! entries; the execution check consults them to catch a later `chmod +x` on
//! something that came from the network.
//!
//! Writes go through a temporary file in the same directory followed by a
//! rename, so a concurrent invocation never observes a half-written ledger.

use crate::config::Policy;
use crate::paths::Workspace;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Metadata for one downloaded file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub url: String,
    /// RFC 3339 UTC timestamp of the recording.
    pub downloaded_at: String,
    /// Whether the execution check has already content-probed the file.
    pub checked_binary: bool,
}

/// The downloaded-file ledger, keyed by canonical path.
#[derive(Debug)]
pub struct DownloadLedger {
    path: PathBuf,
    entries: BTreeMap<String, LedgerEntry>,
    loaded: bool,
}

impl DownloadLedger {
    /// A ledger stored at an explicit file path.
    #[must_use]
    pub fn at(path: PathBuf) -> Self {
        Self {
            path,
            entries: BTreeMap::new(),
            loaded: false,
        }
    }

    /// The ledger for a workspace, at the policy-configured relative path.
    #[must_use]
    pub fn for_workspace(workspace: &Workspace, policy: &Policy) -> Self {
        Self::at(
            workspace
                .project_root
                .join(&policy.download_protection.downloaded_files_metadata),
        )
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record a download. Read-modify-write; failures are reported but the
    /// in-memory view stays consistent.
    pub fn record(&mut self, canonical_path: &Path, url: &str) -> io::Result<()> {
        self.ensure_loaded();
        self.entries.insert(
            canonical_path.to_string_lossy().into_owned(),
            LedgerEntry {
                url: url.to_string(),
                downloaded_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
                checked_binary: false,
            },
        );
        self.save()
    }

    /// Whether a canonical path was previously recorded.
    pub fn contains(&mut self, canonical_path: &Path) -> bool {
        self.ensure_loaded();
        self.entries
            .contains_key(canonical_path.to_string_lossy().as_ref())
    }

    /// A snapshot of all entries.
    pub fn entries(&mut self) -> &BTreeMap<String, LedgerEntry> {
        self.ensure_loaded();
        &self.entries
    }

    fn ensure_loaded(&mut self) {
        if self.loaded {
            return;
        }
        self.loaded = true;

        let Ok(data) = std::fs::read_to_string(&self.path) else {
            return;
        };
        // A corrupt ledger is treated as empty rather than poisoning decisions.
        if let Ok(entries) = serde_json::from_str(&data) {
            self.entries = entries;
        }
    }

    fn save(&self) -> io::Result<()> {
        let parent = self
            .path
            .parent()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "ledger path has no parent"))?;
        std::fs::create_dir_all(parent)?;

        let json = serde_json::to_string_pretty(&self.entries)?;

        // Temp file in the same directory, then rename: atomic on POSIX.
        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
        tmp.write_all(json.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        Ok(())
    }
}
