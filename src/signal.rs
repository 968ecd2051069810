//! Process-wide coordination shared by every worker pool in the process.
//!
//! Mirrors the classic job-system layout: one signal mutex and condition
//! variable for the whole pool, a monotonically increasing job id, and an
//! active-worker counter kept as telemetry.

use lazy_static::lazy_static;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::atomic::{AtomicUsize, Ordering};

static NEXT_JOB_ID: AtomicUsize = AtomicUsize::new(0);

/// Assigns the next process-wide job id, for debugging and profiling.
pub(crate) fn next_job_id() -> usize {
    NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed)
}

/// Global sleep/wake point for worker threads.
///
/// Wakeups are broadcast; a thread that finds no runnable work simply
/// re-sleeps. Notifications take the signal lock first so a worker that has
/// just scanned empty queues cannot miss the wakeup between its scan and its
/// wait.
pub(crate) struct SignalHub {
    lock: Mutex<()>,
    signal_threads: Condvar,
    active_workers: AtomicUsize,
}

impl SignalHub {
    fn new() -> Self {
        SignalHub {
            lock: Mutex::new(()),
            signal_threads: Condvar::new(),
            active_workers: AtomicUsize::new(0),
        }
    }

    /// Takes the signal lock. Held only around the wait predicate check,
    /// never while a job executes.
    pub(crate) fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock()
    }

    pub(crate) fn wait(&self, guard: &mut MutexGuard<'_, ()>) {
        self.signal_threads.wait(guard);
    }

    pub(crate) fn notify_one(&self) {
        let _guard = self.lock.lock();
        self.signal_threads.notify_one();
    }

    pub(crate) fn notify_all(&self) {
        let _guard = self.lock.lock();
        self.signal_threads.notify_all();
    }

    pub(crate) fn worker_active(&self) {
        self.active_workers.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn worker_idle(&self) {
        self.active_workers.fetch_sub(1, Ordering::AcqRel);
    }

    pub(crate) fn active_workers(&self) -> usize {
        self.active_workers.load(Ordering::Acquire)
    }
}

lazy_static! {
    pub(crate) static ref SIGNAL_HUB: SignalHub = SignalHub::new();
}
