//! Write scheduling: debounce, pacing, and the background writer thread.
//!
//! Every store owns one writer thread fed by a command channel. Mutations
//! only flip scheduler state under a mutex and, when the store goes from idle
//! to dirty, post a single [`Command::Save`]. The writer runs the cycle
//! (serialize, stage, rotate, install) and then holds the store in
//! [`WriteState::CoolingDown`] for `min_save_interval` before it will start
//! another one. Dropping the sender side shuts the thread down.

use crate::backup::BackupChain;
use crate::error::{Error, Result};
use crate::flush::{self, FlushWaiters, Waiter};
use crate::persist;
use crate::serializer::Serializer;
use crate::Document;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// Hook called on the writer thread whenever a write cycle fails.
pub type ErrorHook = Arc<dyn Fn(&Error) + Send + Sync>;

/// Where the scheduler is in its write cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteState {
    /// Disk matches memory as far as the scheduler knows; nothing queued.
    Idle,
    /// A save has been posted to the writer but has not started.
    WritePending,
    /// A cycle is serializing or touching the disk.
    Writing,
    /// A cycle finished; no new one starts until the pacing window ends.
    CoolingDown,
}

/// Write counters since the store was opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// Cycles that reached the disk and installed a new primary.
    pub writes: u64,
    /// Cycles skipped because the payload was unchanged or the store is
    /// read-only.
    pub skipped: u64,
    /// Cycles that ended in an error.
    pub failures: u64,
}

pub(crate) enum Command {
    /// Run the pending write cycle.
    Save,
    /// Fire waiters if the store is already settled.
    Notify,
}

/// Scheduler bookkeeping. Every transition happens under one lock.
pub(crate) struct Scheduler {
    phase: WriteState,
    needs_write: bool,
    /// Last cycle failed and nothing has reached the disk since.
    stale: bool,
    last_serialized: Option<Vec<u8>>,
    waiters: FlushWaiters,
    last_error: Option<Error>,
    stats: Stats,
}

impl Scheduler {
    pub(crate) fn new(last_serialized: Option<Vec<u8>>) -> Self {
        Self {
            phase: WriteState::Idle,
            needs_write: false,
            stale: false,
            last_serialized,
            waiters: FlushWaiters::default(),
            last_error: None,
            stats: Stats::default(),
        }
    }

    /// Mark the document dirty. Returns `true` when the caller must post
    /// [`Command::Save`]: only the idle-to-pending edge does.
    pub(crate) fn request_save(&mut self) -> bool {
        if self.needs_write {
            return false;
        }
        self.needs_write = true;
        if self.phase == WriteState::Idle {
            self.phase = WriteState::WritePending;
            true
        } else {
            false
        }
    }

    /// Queue a waiter and say what, if anything, the writer must be told.
    ///
    /// A blocking waiter on a store whose last write failed re-requests the
    /// write; callbacks just wait for the next successful one.
    pub(crate) fn register(&mut self, waiter: Waiter) -> Option<Command> {
        let retry = self.stale && matches!(waiter, Waiter::Blocking(_));
        self.waiters.push(waiter);
        if retry && self.request_save() {
            return Some(Command::Save);
        }
        self.is_settled().then_some(Command::Notify)
    }

    fn is_settled(&self) -> bool {
        !self.needs_write
            && !self.stale
            && matches!(self.phase, WriteState::Idle | WriteState::CoolingDown)
    }

    pub(crate) fn phase(&self) -> WriteState {
        self.phase
    }

    pub(crate) fn stats(&self) -> Stats {
        self.stats
    }

    pub(crate) fn take_error(&mut self) -> Option<Error> {
        self.last_error.take()
    }
}

/// State shared between the store handle and its writer thread.
pub(crate) struct Shared {
    pub(crate) doc: Mutex<Document>,
    pub(crate) sched: Mutex<Scheduler>,
    pub(crate) path: PathBuf,
    pub(crate) chain: BackupChain,
    pub(crate) serializer: Box<dyn Serializer>,
    pub(crate) min_save_interval: Duration,
    pub(crate) read_only: bool,
    pub(crate) on_error: Option<ErrorHook>,
}

enum Outcome {
    /// Nothing hit the disk. `again` when a mutation raced the comparison.
    Skipped { again: bool },
    Written,
    Failed,
}

/// Writer thread body. Returns once every sender is gone, after writing
/// whatever is still pending.
pub(crate) fn run(shared: Arc<Shared>, rx: Receiver<Command>) {
    let mut cooldown: Option<Instant> = None;
    loop {
        let cmd = match cooldown {
            Some(until) => {
                match rx.recv_timeout(until.saturating_duration_since(Instant::now())) {
                    Ok(cmd) => cmd,
                    Err(RecvTimeoutError::Timeout) => {
                        cooldown = shared.end_cooldown();
                        continue;
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            None => match rx.recv() {
                Ok(cmd) => cmd,
                Err(_) => break,
            },
        };
        match cmd {
            Command::Save => {
                if shared.sched.lock().phase == WriteState::WritePending {
                    cooldown = shared.run_cycles();
                }
            }
            Command::Notify => shared.notify_if_settled(),
        }
    }
    shared.shutdown();
}

impl Shared {
    /// Run cycles until one leaves nothing behind. Returns the end of the
    /// pacing window when the disk was touched (or a write failed).
    fn run_cycles(&self) -> Option<Instant> {
        loop {
            match self.cycle() {
                Outcome::Skipped { again: true } => continue,
                Outcome::Skipped { again: false } => return None,
                Outcome::Written | Outcome::Failed => {
                    return Some(Instant::now() + self.min_save_interval)
                }
            }
        }
    }

    fn cycle(&self) -> Outcome {
        {
            let mut s = self.sched.lock();
            s.phase = WriteState::Writing;
            s.needs_write = false;
        }

        // needs_write is cleared before the snapshot, so a mutation landing
        // from here on re-arms it and the cycle runs again.
        let serialized = self.serializer.serialize(&self.doc.lock());
        let bytes = match serialized {
            Ok(b) => b,
            Err(err) => return self.fail(err),
        };

        let mut s = self.sched.lock();
        if self.read_only || s.last_serialized.as_deref() == Some(bytes.as_slice()) {
            s.stats.skipped += 1;
            s.stale = false;
            if s.needs_write {
                s.phase = WriteState::WritePending;
                return Outcome::Skipped { again: true };
            }
            s.phase = WriteState::Idle;
            let waiters = s.waiters.take_all();
            drop(s);
            debug!(path = %self.path.display(), read_only = self.read_only, "write skipped");
            flush::fire_ok(waiters);
            return Outcome::Skipped { again: false };
        }
        drop(s);

        if let Err(err) = self.write(&bytes) {
            return self.fail(err);
        }

        let mut s = self.sched.lock();
        debug!(path = %self.path.display(), bytes = bytes.len(), "write installed");
        s.last_serialized = Some(bytes);
        s.stats.writes += 1;
        s.stale = false;
        s.phase = WriteState::CoolingDown;
        // a newer write is queued; its completion answers these waiters
        let waiters = if s.needs_write {
            Vec::new()
        } else {
            s.waiters.take_all()
        };
        drop(s);
        flush::fire_ok(waiters);
        Outcome::Written
    }

    fn write(&self, bytes: &[u8]) -> Result<()> {
        let tmp = persist::stage(&self.path, bytes)?;
        self.chain.rotate()?;
        persist::install(&tmp, &self.path)
    }

    fn fail(&self, err: Error) -> Outcome {
        error!(path = %self.path.display(), %err, "write cycle failed");
        let mut s = self.sched.lock();
        s.stats.failures += 1;
        s.stale = true;
        s.last_serialized = None;
        s.last_error = Some(err.clone());
        s.phase = WriteState::CoolingDown;
        let blocking = s.waiters.take_blocking();
        drop(s);
        flush::fire_err(blocking, &err);
        if let Some(hook) = &self.on_error {
            flush::guarded("error hook", || hook(&err));
        }
        Outcome::Failed
    }

    fn end_cooldown(&self) -> Option<Instant> {
        let mut s = self.sched.lock();
        if s.phase != WriteState::CoolingDown {
            return None;
        }
        if s.needs_write {
            s.phase = WriteState::WritePending;
            drop(s);
            return self.run_cycles();
        }
        s.phase = WriteState::Idle;
        None
    }

    fn notify_if_settled(&self) {
        let mut s = self.sched.lock();
        if !s.is_settled() {
            return;
        }
        let waiters = s.waiters.take_all();
        drop(s);
        flush::fire_ok(waiters);
    }

    /// Final write on close, ignoring whatever is left of the pacing window.
    fn shutdown(&self) {
        let pending = {
            let mut s = self.sched.lock();
            let pending = s.needs_write || s.phase == WriteState::WritePending;
            if pending {
                s.phase = WriteState::WritePending;
            }
            pending
        };
        if pending {
            debug!(path = %self.path.display(), "writing pending changes on close");
            self.run_cycles();
        }

        let mut s = self.sched.lock();
        s.phase = WriteState::Idle;
        let leftover = s.waiters.take_blocking();
        if !s.waiters.is_empty() {
            debug!(count = s.waiters.len(), "dropping flush callbacks of a failed write");
        }
        drop(s);
        flush::fire_closed(leftover);
    }
}
