//! Flush waiters: one-shot notifications that the disk caught up with memory.

use crate::error::{Error, Result};
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use tracing::error;

/// Callback registered through [`on_flush`](crate::FileStore::on_flush).
pub type FlushCallback = Box<dyn FnOnce() + Send + 'static>;

/// Someone waiting for the next consistent on-disk state.
pub(crate) enum Waiter {
    /// Fired on success only. A failed cycle leaves it queued for the next one.
    Callback(FlushCallback),
    /// A blocked [`flush`](crate::FileStore::flush) call. Gets the outcome
    /// either way.
    Blocking(mpsc::Sender<Result<()>>),
}

/// Ordered queue of waiters. Draining it hands the waiters back so they run
/// outside the scheduler lock.
#[derive(Default)]
pub(crate) struct FlushWaiters {
    queue: Vec<Waiter>,
}

impl FlushWaiters {
    pub(crate) fn push(&mut self, waiter: Waiter) {
        self.queue.push(waiter);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }

    /// Take every waiter for a successful flush.
    pub(crate) fn take_all(&mut self) -> Vec<Waiter> {
        std::mem::take(&mut self.queue)
    }

    /// Take the blocking waiters for a failed cycle; callbacks stay queued.
    pub(crate) fn take_blocking(&mut self) -> Vec<Waiter> {
        let (blocking, callbacks) = std::mem::take(&mut self.queue)
            .into_iter()
            .partition(|w| matches!(w, Waiter::Blocking(_)));
        self.queue = callbacks;
        blocking
    }
}

/// Resolve waiters taken after a successful (or skipped) write.
pub(crate) fn fire_ok(waiters: Vec<Waiter>) {
    for waiter in waiters {
        match waiter {
            Waiter::Callback(cb) => guarded("flush callback", cb),
            Waiter::Blocking(tx) => {
                let _ = tx.send(Ok(()));
            }
        }
    }
}

/// Run user code on the writer thread. A panic is logged and swallowed so the
/// thread keeps serving the store.
pub(crate) fn guarded(what: &str, f: impl FnOnce()) {
    if panic::catch_unwind(AssertUnwindSafe(f)).is_err() {
        error!(what, "user code panicked on the writer thread");
    }
}

/// Resolve blocking waiters taken after a failed write.
pub(crate) fn fire_err(waiters: Vec<Waiter>, err: &Error) {
    for waiter in waiters {
        if let Waiter::Blocking(tx) = waiter {
            let _ = tx.send(Err(err.clone()));
        }
    }
}

/// Resolve whatever is left when the worker exits without a write to wait on.
pub(crate) fn fire_closed(waiters: Vec<Waiter>) {
    fire_err(waiters, &Error::Closed);
}
