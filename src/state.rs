//! Job state: readiness, completion, cancellation, and dependency tracking.
//!
//! A [`JobHandle`] is shared between the submitter, the worker that runs the
//! job, and any dependant jobs. Callers can [`JobState::wait`] on a handle or
//! [`JobState::cancel`] it, though the preferred pattern for waiting is
//! `JobManager::assist_until_job_done`, which drains work instead of
//! stalling the caller.

use crate::signal::{next_job_id, SIGNAL_HUB};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Shared handle to a job's coordination state.
pub type JobHandle = Arc<JobState>;

const WAIT_POLL_INTERVAL: Duration = Duration::from_micros(10);

/// Coordination record for a single job.
///
/// A job is *runnable* iff it is ready, not cancelled, not done, and all of
/// its predecessors have completed.
pub struct JobState {
    ready: AtomicBool,
    done: AtomicBool,
    cancel: AtomicBool,

    /// Number of outstanding predecessors. Incremented when another job
    /// registers this one as a dependant, decremented when that job completes.
    dependencies: AtomicI32,

    /// Jobs whose dependency counter must be decremented when this job
    /// completes. Registered before this job is marked ready.
    dependants: Mutex<Vec<JobHandle>>,

    id: usize,
    tag: char,
}

impl JobState {
    pub(crate) fn new(tag: char) -> JobHandle {
        Arc::new(JobState {
            ready: AtomicBool::new(false),
            done: AtomicBool::new(false),
            cancel: AtomicBool::new(false),
            dependencies: AtomicI32::new(0),
            dependants: Mutex::new(Vec::new()),
            id: next_job_id(),
            tag,
        })
    }

    /// Releases the job for execution and wakes the worker pool.
    ///
    /// All dependants must be registered before this is called; marking ready
    /// first would let the job complete before a late registration increments
    /// the dependant's counter. Calling this more than once is harmless.
    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::Release);

        SIGNAL_HUB.notify_all();
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Requests that the job be skipped. A job that has already started
    /// runs to completion; a job still in a queue is dropped without running
    /// and its dependants are released as usual.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub(crate) fn awaiting_cancellation(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Blocks the calling thread until the job completes, polling roughly
    /// every 10 microseconds. Does not assist with draining work.
    pub fn wait(&self) {
        while !self.is_done() {
            thread::sleep(WAIT_POLL_INTERVAL);
        }
    }

    /// Like [`JobState::wait`] but gives up after `max_wait`. Returns whether
    /// the job had completed by the time the call returned.
    pub fn wait_timeout(&self, max_wait: Duration) -> bool {
        let mut waited = Duration::ZERO;

        while !self.is_done() {
            thread::sleep(WAIT_POLL_INTERVAL);

            waited += WAIT_POLL_INTERVAL;
            if waited > max_wait {
                break;
            }
        }

        self.is_done()
    }

    /// Registers `dependant` to run only after this job completes.
    ///
    /// Must be called before this job is marked ready.
    pub fn add_dependant(&self, dependant: &JobHandle) {
        self.dependants.lock().push(dependant.clone());

        dependant.dependencies.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn are_dependencies_met(&self) -> bool {
        if !self.ready.load(Ordering::Acquire) {
            return false;
        }

        if self.dependencies.load(Ordering::Relaxed) > 0 {
            return false;
        }

        true
    }

    /// Marks the job complete and releases its dependants.
    ///
    /// Dependants are decremented before the `done` release-store so that a
    /// dependant observed as runnable also observes its predecessor complete.
    pub(crate) fn set_done(&self) {
        for dependant in self.dependants.lock().iter() {
            dependant.dependencies.fetch_add(-1, Ordering::Relaxed);
        }

        self.done.store(true, Ordering::Release);
    }

    /// Process-wide id, for debugging and profiling displays.
    pub fn id(&self) -> usize {
        self.id
    }

    #[cfg(test)]
    pub(crate) fn dependency_count(&self) -> i32 {
        self.dependencies.load(Ordering::Relaxed)
    }

    /// Single-character debug tag stamped at submission.
    pub fn tag(&self) -> char {
        self.tag
    }
}
