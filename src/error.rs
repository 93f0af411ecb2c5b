//! Unified error type for all store operations.

use std::path::Path;
use thiserror::Error;

/// Things that can go wrong when using the store.
///
/// `Clone` so a single failed write can be handed to every blocked
/// [`flush`](crate::FileStore::flush) caller and to the error hook.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// File system problem (write, rename, unlink, probe).
    #[error("i/o error: {0}")]
    Io(String),
    /// Failed to serialize the document to bytes.
    #[error("serialization error: {0}")]
    Serialize(String),
    /// Bytes on disk are not a JSON object.
    #[error("deserialization error: {0}")]
    Deserialize(String),
    /// Bad configuration (empty filename, etc.).
    #[error("config error: {0}")]
    Config(String),
    /// The background writer is gone; the store is shutting down.
    #[error("store is closed")]
    Closed,
    /// A blocking call was made on the writer thread (from a flush callback
    /// or the error hook) and would wait on itself.
    #[error("blocking call on the writer thread would deadlock")]
    WriterThread,
}

impl Error {
    /// I/O error annotated with the operation and the file it touched.
    pub(crate) fn io(op: &str, path: &Path, err: std::io::Error) -> Self {
        Error::Io(format!("{op} {}: {err}", path.display()))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        if err.is_io() {
            Error::Io(err.to_string())
        } else if err.is_syntax() || err.is_eof() || err.is_data() {
            Error::Deserialize(err.to_string())
        } else {
            Error::Serialize(err.to_string())
        }
    }
}

/// Result alias using our [`Error`] type.
pub type Result<T> = std::result::Result<T, Error>;
