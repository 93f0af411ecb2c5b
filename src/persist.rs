//! Disk I/O helpers: slot paths, load with backup fallback, stage + install.
//!
//! A write cycle stages the payload in `<path>.tmp`, lets the
//! [`BackupChain`](crate::backup::BackupChain) shift the old files down, then
//! renames the temp file over `<path>`. The rename is close to atomic on most
//! platforms. On FAT32 or network shares there are no hard guarantees, which
//! is what the backups are for.

use crate::error::{Error, Result};
use crate::serializer::Serializer;
use crate::Document;
use std::ffi::OsString;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Path of chain slot `slot`: `0` is the primary, `k` is `<path>.(k-1).bak`.
pub fn slot_path(base: &Path, slot: usize) -> PathBuf {
    if slot == 0 {
        base.to_path_buf()
    } else {
        with_suffix(base, &format!(".{}.bak", slot - 1))
    }
}

/// Path of the staging file, `<path>.tmp`.
pub fn tmp_path(base: &Path) -> PathBuf {
    with_suffix(base, ".tmp")
}

fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(base.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// A document recovered from the chain.
#[derive(Debug)]
pub struct Loaded {
    /// The parsed document.
    pub doc: Document,
    /// Chain slot it came from (0 = primary).
    pub slot: usize,
}

/// Walk the primary then each backup until one parses. Returns `None` when
/// nothing in the chain is usable; that is not an error.
pub fn load_chain<S>(base: &Path, max_backups: usize, serializer: &S) -> Option<Loaded>
where
    S: Serializer + ?Sized,
{
    for slot in 0..=max_backups {
        let path = slot_path(base, slot);
        match try_load(&path, serializer) {
            Ok(Some(doc)) => {
                if slot > 0 {
                    warn!(path = %path.display(), slot, "recovered document from backup");
                }
                return Some(Loaded { doc, slot });
            }
            Ok(None) => debug!(path = %path.display(), slot, "not found"),
            Err(err) => warn!(path = %path.display(), slot, %err, "unusable, trying next"),
        }
    }
    None
}

fn try_load<S>(path: &Path, serializer: &S) -> Result<Option<Document>>
where
    S: Serializer + ?Sized,
{
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::io("read", path, e)),
    };
    serializer.deserialize(&bytes).map(Some)
}

/// Write `bytes` to `<base>.tmp` and sync it. Whatever a crashed cycle left
/// behind is simply overwritten.
pub fn stage(base: &Path, bytes: &[u8]) -> Result<PathBuf> {
    let tmp = tmp_path(base);
    let mut file = File::create(&tmp).map_err(|e| Error::io("create", &tmp, e))?;
    file.write_all(bytes).map_err(|e| Error::io("write", &tmp, e))?;
    file.sync_all().map_err(|e| Error::io("sync", &tmp, e))?;
    Ok(tmp)
}

/// Promote the staged file to primary. Last step of a write cycle.
pub fn install(tmp: &Path, base: &Path) -> Result<()> {
    std::fs::rename(tmp, base).map_err(|e| Error::io("rename", tmp, e))
}
