//! Per-worker job queue.
//!
//! Entries are inserted at the front and the pop scan also runs front to
//! back, so both the owning worker and thieves take newest-first. Cancelled
//! entries are dropped during the scan and still release their dependants.

use crate::profiling::{JobEvent, JobEventObserver};
use crate::state::JobHandle;
use parking_lot::Mutex;
use std::collections::VecDeque;
use tracing::trace;

/// The callable carried by a job. Side effects only.
pub(crate) type JobDelegate = Box<dyn FnOnce() + Send + 'static>;

/// A pending job: the delegate to invoke plus its shared state.
pub(crate) struct JobQueueEntry {
    pub(crate) delegate: JobDelegate,
    pub(crate) state: JobHandle,
}

/// Ordered container of pending entries, guarded by its own mutex.
///
/// A thief locks the peer's queue; a peer never locks its thief's queue, so
/// no thread ever holds two queue locks at once.
pub(crate) struct JobQueue {
    entries: Mutex<VecDeque<JobQueueEntry>>,
}

impl JobQueue {
    pub(crate) fn new() -> Self {
        JobQueue {
            entries: Mutex::new(VecDeque::new()),
        }
    }

    pub(crate) fn push_front(&self, entry: JobQueueEntry) {
        self.entries.lock().push_front(entry);
    }

    /// Scans for the first entry whose job is runnable.
    ///
    /// Cancelled entries encountered by the scan are removed and marked done
    /// so their dependants make forward progress. The second return value
    /// reports whether any entry with unsatisfied dependencies remains.
    pub(crate) fn pop_runnable(
        &self,
        scanner: usize,
        observer: &JobEventObserver,
    ) -> (Option<JobQueueEntry>, bool) {
        let mut entries = self.entries.lock();
        let mut has_unsatisfied_dependencies = false;

        let mut index = 0;
        while index < entries.len() {
            let candidate = &entries[index];

            if candidate.state.awaiting_cancellation() {
                let entry = entries.remove(index).unwrap();
                trace!(job = entry.state.id(), "dropping cancelled job");
                entry.state.set_done();
            } else if candidate.state.are_dependencies_met() {
                let entry = entries.remove(index).unwrap();
                (observer)(JobEvent::JobPopped, scanner, Some(&entry.state));

                return (Some(entry), has_unsatisfied_dependencies);
            } else {
                has_unsatisfied_dependencies = true;
                index += 1;
            }
        }

        (None, has_unsatisfied_dependencies)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::JobState;
    use std::sync::Arc;

    fn no_op_observer() -> JobEventObserver {
        Arc::new(|_, _, _| {})
    }

    fn entry_with_state(state: &JobHandle) -> JobQueueEntry {
        JobQueueEntry {
            delegate: Box::new(|| {}),
            state: state.clone(),
        }
    }

    #[test]
    fn test_pop_skips_unready_entries() {
        let queue = JobQueue::new();
        let state = JobState::new('\0');
        queue.push_front(entry_with_state(&state));

        let (entry, unsatisfied) = queue.pop_runnable(0, &no_op_observer());
        assert!(entry.is_none());
        assert!(unsatisfied);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_pop_takes_runnable_entry() {
        let queue = JobQueue::new();
        let state = JobState::new('\0');
        state.set_ready();
        queue.push_front(entry_with_state(&state));

        let (entry, unsatisfied) = queue.pop_runnable(0, &no_op_observer());
        assert!(entry.is_some());
        assert!(!unsatisfied);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_pop_drops_cancelled_entry_and_releases_dependants() {
        let queue = JobQueue::new();
        let cancelled = JobState::new('\0');
        let dependant = JobState::new('\0');
        cancelled.add_dependant(&dependant);
        dependant.set_ready();
        cancelled.cancel();
        queue.push_front(entry_with_state(&cancelled));

        let (entry, unsatisfied) = queue.pop_runnable(0, &no_op_observer());
        assert!(entry.is_none());
        assert!(!unsatisfied);
        assert!(queue.is_empty());
        assert!(cancelled.is_done());
        assert!(dependant.are_dependencies_met());
    }

    #[test]
    fn test_scan_is_front_to_back() {
        let queue = JobQueue::new();
        let older = JobState::new('1');
        let newer = JobState::new('2');
        older.set_ready();
        newer.set_ready();
        queue.push_front(entry_with_state(&older));
        queue.push_front(entry_with_state(&newer));

        let (entry, _) = queue.pop_runnable(0, &no_op_observer());
        assert_eq!(entry.unwrap().state.tag(), '2');
    }
}
