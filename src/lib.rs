//! Single-file JSON key-value store with debounced background writes and
//! rotating backups.
//!
//! Mutations land in memory right away. A writer thread coalesces them into
//! one write, stages it in `<path>.tmp`, shifts the old files down the
//! `<path>.N.bak` chain, and renames the temp file into place. Opening walks
//! the primary and then each backup until one parses.
//!
//! ```rust,no_run
//! use json_filestore::FileStore;
//!
//! let store = FileStore::open("state.json").unwrap();
//! let runs = store.get_or("runs", 0).as_u64().unwrap_or(0);
//! store.set("runs", runs + 1);
//! store.flush().unwrap();
//! ```
//!
//! **Single-process only.** Two stores on the same path, in one process or
//! several, race on the primary and the backup chain; what ends up on disk is
//! unspecified.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod backup;
pub mod error;
pub mod flush;
pub mod options;
pub mod persist;
pub mod scheduler;
pub mod serializer;
pub mod store;

pub use error::{Error, Result};
pub use options::Options;
pub use scheduler::{Stats, WriteState};
pub use serializer::{JsonSerializer, Serializer};
pub use store::{FileStore, FileStoreBuilder};

/// The in-memory document: a JSON object.
pub type Document = serde_json::Map<String, serde_json::Value>;
