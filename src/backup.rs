//! Backup rotation.
//!
//! The chain is `P, P.0.bak, ..., P.(N-1).bak`, newest first. Rotation runs
//! once per real write, after the new payload is staged and before it is
//! installed, so the primary is never moved away before the replacement is on
//! disk.

use crate::error::{Error, Result};
use crate::persist::slot_path;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Fixed list of slot paths for one store.
#[derive(Debug, Clone)]
pub struct BackupChain {
    slots: Vec<PathBuf>,
}

impl BackupChain {
    /// Chain for primary `base` keeping at most `max_backups` backups.
    pub fn new(base: &Path, max_backups: usize) -> Self {
        let slots = (0..=max_backups).map(|s| slot_path(base, s)).collect();
        Self { slots }
    }

    /// Number of backups kept (N).
    pub fn depth(&self) -> usize {
        self.slots.len() - 1
    }

    /// All slot paths, primary first.
    pub fn slots(&self) -> &[PathBuf] {
        &self.slots
    }

    /// Shift every existing file one slot deeper, evicting the oldest backup.
    ///
    /// Gaps are skipped. With a depth of 0 nothing is touched; the install
    /// rename replaces the primary on its own.
    pub fn rotate(&self) -> Result<()> {
        let depth = self.depth();
        if depth == 0 {
            return Ok(());
        }

        let oldest = &self.slots[depth];
        if exists(oldest)? {
            std::fs::remove_file(oldest).map_err(|e| Error::io("unlink", oldest, e))?;
            debug!(path = %oldest.display(), "evicted oldest backup");
        }

        for slot in (0..depth).rev() {
            let from = &self.slots[slot];
            if !exists(from)? {
                continue;
            }
            let to = &self.slots[slot + 1];
            std::fs::rename(from, to).map_err(|e| Error::io("rename", from, e))?;
        }
        Ok(())
    }
}

/// Only `NotFound` means absent; anything else is a real failure.
fn exists(path: &Path) -> Result<bool> {
    match std::fs::symlink_metadata(path) {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::io("stat", path, e)),
    }
}
