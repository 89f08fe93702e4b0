//! Append-only idempotency ledger
//!
//! A ledger is a UTF-8 text file with one opaque identifier per line. An identifier
//! is present iff the artifact it names was durably produced: callers append only
//! after the artifact is confirmed on disk, so a crash between the two leaves the
//! item absent and it is simply processed again on the next run.
//!
//! Two ledgers are used by the pipeline:
//! - the download ledger (post identifiers)
//! - the merge ledger (raw file names already consumed by a merge)

use crate::error::{LedgerError, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// In-memory view of a ledger file plus its append handle
#[derive(Debug)]
pub struct Ledger {
    path: PathBuf,
    /// Entries in file order
    entries: Vec<String>,
    index: HashSet<String>,
    /// The file ends in a partial line left by an interrupted write
    torn_tail: bool,
}

impl Ledger {
    /// Load the ledger at `path`; a missing file is an empty ledger
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "ledger not found, starting empty");
                return Ok(Self::empty(path));
            }
            Err(source) => return Err(LedgerError::Read { path, source }.into()),
        };

        let text = String::from_utf8_lossy(&bytes);
        let torn_tail = !text.is_empty() && !text.ends_with('\n');
        let complete = match text.rfind('\n') {
            Some(pos) => &text[..pos],
            None => "",
        };
        if torn_tail {
            warn!(
                path = %path.display(),
                "ledger ends with a partial line, ignoring the fragment"
            );
        }

        let mut ledger = Self::empty(path);
        ledger.torn_tail = torn_tail;
        for line in complete.lines() {
            let id = line.trim();
            if !id.is_empty() && ledger.index.insert(id.to_string()) {
                ledger.entries.push(id.to_string());
            }
        }

        debug!(
            path = %ledger.path.display(),
            entries = ledger.entries.len(),
            "ledger loaded"
        );
        Ok(ledger)
    }

    fn empty(path: PathBuf) -> Self {
        Self {
            path,
            entries: Vec::new(),
            index: HashSet::new(),
            torn_tail: false,
        }
    }

    /// Whether `id` has been recorded
    pub fn contains(&self, id: &str) -> bool {
        self.index.contains(id)
    }

    /// Number of recorded identifiers
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been recorded yet
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Recorded identifiers in file order
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    /// Location of the ledger file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Durably record every identifier in `ids` that is not yet present
    ///
    /// All new identifiers are written as one buffer and flushed with `sync_all`
    /// before returning. Duplicates (against the ledger and within `ids`) are
    /// skipped; identifiers that are empty or contain a line break are rejected
    /// with a warning. Returns the number of identifiers written.
    pub async fn append<I, S>(&mut self, ids: I) -> Result<usize>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut fresh: Vec<String> = Vec::new();
        let mut seen = HashSet::new();
        for id in ids {
            let id = id.as_ref().trim();
            if id.is_empty() || id.contains(['\n', '\r']) {
                warn!(id, "refusing to record malformed ledger identifier");
                continue;
            }
            if !self.index.contains(id) && seen.insert(id.to_string()) {
                fresh.push(id.to_string());
            }
        }

        if fresh.is_empty() {
            return Ok(0);
        }

        let mut buffer = String::new();
        if self.torn_tail {
            buffer.push('\n');
        }
        for id in &fresh {
            buffer.push_str(id);
            buffer.push('\n');
        }

        self.write(buffer.as_bytes())
            .await
            .map_err(|source| LedgerError::Write {
                path: self.path.clone(),
                source,
            })?;

        self.torn_tail = false;
        for id in &fresh {
            self.index.insert(id.clone());
        }
        let written = fresh.len();
        self.entries.extend(fresh);

        debug!(path = %self.path.display(), written, "ledger appended");
        Ok(written)
    }

    async fn write(&self, bytes: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        file.sync_all().await
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
