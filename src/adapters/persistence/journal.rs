//! Ledger Journal - Append-only JSONL Change Records
//!
//! Every committed transaction appends one `ChangeSet` line to
//! `ledger.journal`. On startup the journal is replayed on top of the
//! last snapshot. Compaction rewrites the snapshot and truncates the
//! journal, so the file only holds commits since the last compaction.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result, bail};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::memory::ChangeSet;

/// Append-only journal of committed change sets.
#[derive(Debug)]
pub struct JournalFile {
    /// Path to ledger.journal.
    path: PathBuf,
    /// Open in append mode for the lifetime of the store.
    file: Mutex<File>,
    /// Entries appended since the last truncation.
    entries: AtomicU64,
}

impl JournalFile {
    /// Open (or create) the journal in the given data directory.
    pub async fn open(data_dir: impl AsRef<Path>) -> Result<Self> {
        let dir = data_dir.as_ref();
        fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create data directory {}", dir.display()))?;

        let path = dir.join("ledger.journal");
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("Failed to open journal {}", path.display()))?;

        Ok(Self {
            path,
            file: Mutex::new(file),
            entries: AtomicU64::new(0),
        })
    }

    /// Append one change set and sync it to disk.
    #[instrument(skip(self, changes))]
    pub async fn append(&self, changes: &ChangeSet) -> Result<()> {
        let mut line = serde_json::to_vec(changes).context("Failed to serialize change set")?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        file.write_all(&line)
            .await
            .context("Failed to write journal entry")?;
        file.flush().await.context("Failed to flush journal")?;
        file.sync_data().await.context("Failed to sync journal")?;

        let entries = self.entries.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(bytes = line.len(), entries, "Journal entry appended");
        Ok(())
    }

    /// Read every complete entry, oldest first.
    ///
    /// A final line that does not parse is a write torn by a crash and is
    /// skipped. A malformed line anywhere else fails the load.
    #[instrument(skip(self))]
    pub async fn load(&self) -> Result<Vec<ChangeSet>> {
        let content = fs::read_to_string(&self.path)
            .await
            .context("Failed to read journal")?;

        let lines: Vec<&str> = content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .collect();
        let mut entries = Vec::with_capacity(lines.len());
        for (index, line) in lines.iter().enumerate() {
            match serde_json::from_str::<ChangeSet>(line) {
                Ok(changes) => entries.push(changes),
                Err(e) if index + 1 == lines.len() => {
                    warn!(
                        path = %self.path.display(),
                        error = %e,
                        "Skipping torn journal tail"
                    );
                }
                Err(e) => bail!("journal entry {} is malformed: {e}", index + 1),
            }
        }

        if !entries.is_empty() {
            info!(
                path = %self.path.display(),
                entries = entries.len(),
                "Journal loaded"
            );
        }
        Ok(entries)
    }

    /// Drop every entry. Called once the snapshot covers them.
    pub async fn truncate(&self) -> Result<()> {
        let file = self.file.lock().await;
        file.set_len(0).await.context("Failed to truncate journal")?;
        file.sync_all().await.context("Failed to sync journal")?;
        self.entries.store(0, Ordering::Relaxed);
        Ok(())
    }

    /// Entries appended since the last truncation.
    pub fn entries(&self) -> u64 {
        self.entries.load(Ordering::Relaxed)
    }

    /// Check that the journal file is still reachable.
    pub async fn is_healthy(&self) -> bool {
        fs::metadata(&self.path).await.is_ok()
    }
}
