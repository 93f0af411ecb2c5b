//! Core store type and builder.

use crate::backup::BackupChain;
use crate::error::{Error, Result};
use crate::flush::{FlushCallback, Waiter};
use crate::options::Options;
use crate::persist::load_chain;
use crate::scheduler::{self, Command, ErrorHook, Scheduler, Shared, Stats, WriteState};
use crate::serializer::{JsonSerializer, Serializer};
use crate::Document;
use parking_lot::{Mutex, MutexGuard};
use serde_json::Value;
use std::path::Path;
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::debug;

/// Persistent JSON-backed key-value store.
///
/// The whole document lives in memory; mutations apply immediately and are
/// written to disk in the background, coalesced and paced by
/// `min_save_interval`. Every real write rotates the previous files into
/// `<path>.N.bak` so a torn or corrupt primary can be recovered on the next
/// open.
///
/// The store is `Send + Sync`. Dropping it writes anything still pending and
/// joins the writer thread.
pub struct FileStore {
    shared: Arc<Shared>,
    tx: Option<mpsc::Sender<Command>>,
    worker: Option<JoinHandle<()>>,
}

impl FileStore {
    /// Open (or start fresh at) `path` with default options.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::builder(path).build()
    }

    /// Open with a complete set of [`Options`].
    pub fn with_options(options: Options) -> Result<Self> {
        FileStoreBuilder::from_options(options).build()
    }

    /// Start configuring a new store. Call [`.build()`](FileStoreBuilder::build)
    /// when ready.
    pub fn builder(path: impl AsRef<Path>) -> FileStoreBuilder {
        FileStoreBuilder::from_options(Options::new(path.as_ref()))
    }

    // ---- reads ----

    /// Current value for `key`, or `None` if absent.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.shared.doc.lock().get(key).cloned()
    }

    /// Current value for `key`, or `default` if absent.
    #[must_use]
    pub fn get_or(&self, key: &str, default: impl Into<Value>) -> Value {
        self.get(key).unwrap_or_else(|| default.into())
    }

    /// `true` if the key exists.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.shared.doc.lock().contains_key(key)
    }

    /// Number of top-level keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.doc.lock().len()
    }

    /// `true` when the document has no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of all top-level keys.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.shared.doc.lock().keys().cloned().collect()
    }

    /// Copy of the whole document.
    #[must_use]
    pub fn snapshot(&self) -> Document {
        self.shared.doc.lock().clone()
    }

    /// Path to the primary JSON file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    // ---- writes ----

    /// Set `key` to `value`, returning the previous value. The write happens
    /// later on the writer thread; several calls in a row share one write.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let prev = self.shared.doc.lock().insert(key.into(), value.into());
        self.save();
        prev
    }

    /// Remove a key, returning its value if it was present.
    pub fn remove(&self, key: &str) -> Option<Value> {
        let prev = self.shared.doc.lock().remove(key);
        if prev.is_some() {
            self.save();
        }
        prev
    }

    /// Apply several changes under one lock. Only schedules one save at the
    /// end, not one per change.
    pub fn update<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut Document) -> R,
    {
        let out = f(&mut self.shared.doc.lock());
        self.save();
        out
    }

    /// Live access to the in-memory document.
    ///
    /// Changes made through the guard are not noticed: call
    /// [`save`](Self::save) afterwards. Holding the guard blocks the writer
    /// from serializing, and calling any other read or mutation on the store
    /// while holding it deadlocks.
    pub fn document(&self) -> MutexGuard<'_, Document> {
        self.shared.doc.lock()
    }

    /// Ask for a write cycle. No-op if one is already pending.
    pub fn save(&self) {
        let post = self.shared.sched.lock().request_save();
        if post {
            self.post(Command::Save);
        }
    }

    // ---- flushing ----

    /// Run `callback` once the disk matches memory.
    ///
    /// If nothing is pending it still runs on the writer thread, never inline.
    /// Callbacks are skipped by failed writes and fire after the next
    /// successful one. They run on the writer thread and should be quick. A
    /// callback that panics is logged and the writer carries on.
    pub fn on_flush<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let cb: FlushCallback = Box::new(callback);
        let cmd = self.shared.sched.lock().register(Waiter::Callback(cb));
        if let Some(cmd) = cmd {
            self.post(cmd);
        }
    }

    /// Block until the disk matches memory.
    ///
    /// Returns the error of the write cycle it waited on, if that failed. If
    /// the previous write failed and nothing changed since, it is attempted
    /// again; the background writer never retries on its own.
    ///
    /// Fails with [`Error::WriterThread`] when called from a flush callback
    /// or the error hook: those run on the thread that would answer it. Use
    /// [`on_flush`](Self::on_flush) there instead.
    pub fn flush(&self) -> Result<()> {
        if self.on_writer_thread() {
            return Err(Error::WriterThread);
        }
        let (tx, rx) = mpsc::channel();
        let cmd = self.shared.sched.lock().register(Waiter::Blocking(tx));
        if let Some(cmd) = cmd {
            self.send(cmd)?;
        }
        rx.recv().map_err(|_| Error::Closed)?
    }

    // ---- introspection ----

    /// Take the error of the most recent failed write, if any.
    pub fn last_error(&self) -> Option<Error> {
        self.shared.sched.lock().take_error()
    }

    /// Write counters since open.
    #[must_use]
    pub fn stats(&self) -> Stats {
        self.shared.sched.lock().stats()
    }

    /// Where the scheduler currently is.
    #[must_use]
    pub fn state(&self) -> WriteState {
        self.shared.sched.lock().phase()
    }

    // ---- internal ----

    fn on_writer_thread(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|h| h.thread().id() == thread::current().id())
    }

    fn send(&self, cmd: Command) -> Result<()> {
        match &self.tx {
            Some(tx) => tx.send(cmd).map_err(|_| Error::Closed),
            None => Err(Error::Closed),
        }
    }

    fn post(&self, cmd: Command) {
        if let Err(err) = self.send(cmd) {
            debug!(path = %self.shared.path.display(), %err, "writer gone, command dropped");
        }
    }
}

impl Drop for FileStore {
    fn drop(&mut self) {
        drop(self.tx.take());
        let on_writer = self.on_writer_thread();
        if let Some(h) = self.worker.take() {
            // dropped from inside a flush callback: the thread exits on its own
            if !on_writer {
                let _ = h.join();
            }
        }
    }
}

impl std::fmt::Debug for FileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStore")
            .field("path", &self.shared.path)
            .field("max_backups", &self.shared.chain.depth())
            .field("min_save_interval", &self.shared.min_save_interval)
            .field("read_only", &self.shared.read_only)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Configures and opens a [`FileStore`].
///
/// ```rust,no_run
/// use json_filestore::FileStore;
/// use std::time::Duration;
///
/// let store = FileStore::builder("state.json")
///     .min_save_interval(Duration::from_millis(250))
///     .max_backups(5)
///     .build()
///     .unwrap();
/// ```
pub struct FileStoreBuilder {
    options: Options,
    serializer: Option<Box<dyn Serializer>>,
    on_error: Option<ErrorHook>,
}

impl FileStoreBuilder {
    fn from_options(options: Options) -> Self {
        Self {
            options,
            serializer: None,
            on_error: None,
        }
    }

    /// Document to start from when no file in the chain loads (default: `{}`).
    pub fn default_object(mut self, doc: Document) -> Self {
        self.options.default_object = doc;
        self
    }

    /// Minimum pause after a completed write (default: 1s).
    pub fn min_save_interval(mut self, interval: Duration) -> Self {
        self.options.min_save_interval = interval;
        self
    }

    /// Number of `.N.bak` files to keep (default: 3).
    pub fn max_backups(mut self, n: usize) -> Self {
        self.options.max_backups = n;
        self
    }

    /// Never write to disk (default: false).
    pub fn read_only(mut self, yes: bool) -> Self {
        self.options.read_only = yes;
        self
    }

    /// Indent the JSON on disk (default: true). Ignored when a custom
    /// serializer is set.
    pub fn pretty(mut self, yes: bool) -> Self {
        self.options.pretty = yes;
        self
    }

    /// Replace the JSON serializer.
    pub fn serializer(mut self, serializer: impl Serializer + 'static) -> Self {
        self.serializer = Some(Box::new(serializer));
        self
    }

    /// Called on the writer thread for every failed write cycle. A panic in
    /// the hook is logged and the writer carries on.
    pub fn on_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(hook));
        self
    }

    /// Load the store and start its writer thread.
    pub fn build(self) -> Result<FileStore> {
        self.options.validate()?;
        let Options {
            filename,
            default_object,
            min_save_interval,
            max_backups,
            read_only,
            pretty,
        } = self.options;

        let serializer: Box<dyn Serializer> = match self.serializer {
            Some(s) => s,
            None if pretty => Box::new(JsonSerializer::pretty()),
            None => Box::new(JsonSerializer::new()),
        };

        // Only a primary that loaded counts as already written; a document
        // recovered from a backup gets rewritten on the first save.
        let loaded = load_chain(&filename, max_backups, &*serializer);
        let (doc, last_serialized) = match loaded {
            Some(loaded) if loaded.slot == 0 => {
                let bytes = serializer.serialize(&loaded.doc).ok();
                (loaded.doc, bytes)
            }
            Some(loaded) => (loaded.doc, None),
            None => {
                debug!(path = %filename.display(), "nothing to load, using default document");
                (default_object, None)
            }
        };

        let shared = Arc::new(Shared {
            doc: Mutex::new(doc),
            sched: Mutex::new(Scheduler::new(last_serialized)),
            chain: BackupChain::new(&filename, max_backups),
            path: filename,
            serializer,
            min_save_interval,
            read_only,
            on_error: self.on_error,
        });

        let (tx, rx) = mpsc::channel();
        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("json-filestore-writer".into())
            .spawn(move || scheduler::run(worker_shared, rx))
            .map_err(|e| Error::Io(format!("spawn writer thread: {e}")))?;

        Ok(FileStore {
            shared,
            tx: Some(tx),
            worker: Some(worker),
        })
    }
}

impl std::fmt::Debug for FileStoreBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStoreBuilder")
            .field("options", &self.options)
            .field("custom_serializer", &self.serializer.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}
