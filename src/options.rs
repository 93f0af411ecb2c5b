//! Store configuration.
//!
//! [`Options`] can be filled in by hand, through
//! [`FileStoreBuilder`](crate::FileStoreBuilder), or deserialized from a config
//! file. Durations are given in milliseconds there:
//!
//! ```json
//! { "filename": "state.json", "min_save_interval": 250, "max_backups": 5 }
//! ```

use crate::error::{Error, Result};
use crate::Document;
use serde::{Deserialize, Deserializer};
use std::path::PathBuf;
use std::time::Duration;

/// Default pause between two completed write cycles.
pub const DEFAULT_MIN_SAVE_INTERVAL: Duration = Duration::from_millis(1000);

/// Default number of rotated backups.
pub const DEFAULT_MAX_BACKUPS: usize = 3;

/// Everything a store needs to open.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Primary file path. Backups and the temp file live next to it.
    pub filename: PathBuf,
    /// Document to start from when nothing in the backup chain loads.
    pub default_object: Document,
    /// Minimum quiet period after a write before the next one may start.
    #[serde(deserialize_with = "millis")]
    pub min_save_interval: Duration,
    /// How many `.N.bak` files to keep.
    pub max_backups: usize,
    /// Keep everything in memory and never touch the disk after loading.
    pub read_only: bool,
    /// Indent the JSON on disk.
    pub pretty: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            filename: PathBuf::new(),
            default_object: Document::new(),
            min_save_interval: DEFAULT_MIN_SAVE_INTERVAL,
            max_backups: DEFAULT_MAX_BACKUPS,
            read_only: false,
            pretty: true,
        }
    }
}

impl Options {
    /// Defaults for the store at `filename`.
    pub fn new(filename: impl Into<PathBuf>) -> Self {
        Self {
            filename: filename.into(),
            ..Self::default()
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.filename.as_os_str().is_empty() {
            return Err(Error::Config("filename must not be empty".into()));
        }
        if self.filename.file_name().is_none() {
            return Err(Error::Config(format!(
                "filename {} does not name a file",
                self.filename.display()
            )));
        }
        Ok(())
    }
}

fn millis<'de, D>(de: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(de).map(Duration::from_millis)
}
