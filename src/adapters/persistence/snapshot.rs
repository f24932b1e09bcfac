//! Ledger Snapshot - Atomic JSON Persistence
//!
//! Writes the whole ledger to `ledger.json` using atomic writes
//! (write to tmp file, then rename) when the journal is compacted. The
//! file is always either the previous or the new compacted state, never
//! a partial write.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs;
use tracing::{debug, info, instrument};

use super::memory::LedgerState;

/// Atomic JSON snapshot of the ledger.
#[derive(Debug)]
pub struct SnapshotFile {
    /// Path to ledger.json.
    path: PathBuf,
    /// Temporary path for atomic writes.
    tmp_path: PathBuf,
}

impl SnapshotFile {
    /// Open the snapshot location in the given data directory.
    ///
    /// Creates the directory if it doesn't exist.
    pub async fn open(data_dir: impl AsRef<Path>) -> Result<Self> {
        let dir = data_dir.as_ref();
        fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create data directory {}", dir.display()))?;

        Ok(Self {
            path: dir.join("ledger.json"),
            tmp_path: dir.join("ledger.json.tmp"),
        })
    }

    /// Save a ledger state atomically (tmp → rename).
    #[instrument(skip(self, state))]
    pub async fn save(&self, state: &LedgerState) -> Result<()> {
        let json = serde_json::to_vec(state).context("Failed to serialize ledger")?;

        fs::write(&self.tmp_path, &json)
            .await
            .context("Failed to write tmp ledger file")?;

        fs::rename(&self.tmp_path, &self.path)
            .await
            .context("Failed to rename ledger file")?;

        debug!(path = %self.path.display(), bytes = json.len(), "Ledger snapshot saved");
        Ok(())
    }

    /// Load the last committed ledger state.
    ///
    /// Returns `None` if no snapshot exists (first startup).
    #[instrument(skip(self))]
    pub async fn load(&self) -> Result<Option<LedgerState>> {
        if !fs::try_exists(&self.path).await.unwrap_or(false) {
            info!(path = %self.path.display(), "No ledger snapshot found, starting fresh");
            return Ok(None);
        }

        let json = fs::read(&self.path)
            .await
            .context("Failed to read ledger file")?;

        let state: LedgerState =
            serde_json::from_slice(&json).context("Failed to parse ledger JSON")?;

        info!(
            path = %self.path.display(),
            orders = state.order_count(),
            "Ledger snapshot loaded"
        );

        Ok(Some(state))
    }

    /// Check that the data directory is still reachable.
    pub async fn is_healthy(&self) -> bool {
        match self.path.parent() {
            Some(dir) => fs::metadata(dir).await.is_ok(),
            None => true,
        }
    }
}
