//! Worker threads.
//!
//! Each worker owns a queue and an OS thread. The thread continuously pops a
//! runnable job from its own queue, then from any peer's queue if stealing
//! is enabled, and sleeps on the global condition variable when no work is
//! available anywhere.

use crate::profiling::{JobEvent, JobEventObserver};
use crate::queue::{JobDelegate, JobQueue, JobQueueEntry};
use crate::signal::SIGNAL_HUB;
use crate::state::{JobHandle, JobState};
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, warn};

/// Configuration for a single worker thread, provided by the host.
#[derive(Clone, Debug)]
pub struct JobWorkerDescriptor {
    /// Worker name, used for the thread name and debug displays.
    pub name: String,
    /// Affinity bitmask over logical cores. Defaults to all cores, which
    /// leaves the thread unpinned.
    pub affinity: u64,
    /// Allow this worker to take jobs from peers' queues.
    pub enable_work_stealing: bool,
}

impl Default for JobWorkerDescriptor {
    fn default() -> Self {
        JobWorkerDescriptor {
            name: "worker".to_string(),
            affinity: u64::MAX,
            enable_work_stealing: true,
        }
    }
}

impl JobWorkerDescriptor {
    pub fn named(name: impl Into<String>) -> Self {
        JobWorkerDescriptor {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// State shared between a worker's thread, its peers, and the manager.
///
/// Peers hold the table of all cores for work-stealing; entries must stay
/// alive until every worker thread has been joined, which the `Arc` table
/// guarantees.
pub(crate) struct WorkerCore {
    pub(crate) index: usize,
    pub(crate) desc: JobWorkerDescriptor,
    pub(crate) queue: JobQueue,
    stop: AtomicBool,
    has_shut_down: AtomicBool,
}

impl WorkerCore {
    pub(crate) fn new(index: usize, desc: JobWorkerDescriptor) -> Self {
        WorkerCore {
            index,
            desc,
            queue: JobQueue::new(),
            stop: AtomicBool::new(false),
            has_shut_down: AtomicBool::new(false),
        }
    }

    /// Creates a new not-yet-ready job and inserts it at the front of this
    /// worker's queue.
    pub(crate) fn push(&self, delegate: JobDelegate, tag: char) -> JobHandle {
        let state = JobState::new(tag);
        self.queue.push_front(JobQueueEntry {
            delegate,
            state: state.clone(),
        });

        state
    }

    /// Pops the next runnable job: own queue first, then every peer's queue
    /// when `use_stealing` is set. Scanning our own slot again during the
    /// steal pass is tolerated.
    pub(crate) fn pop_next(
        &self,
        table: &[Arc<WorkerCore>],
        use_stealing: bool,
        observer: &JobEventObserver,
    ) -> (Option<JobQueueEntry>, bool) {
        let (entry, mut has_unsatisfied_dependencies) =
            self.queue.pop_runnable(self.index, observer);
        if entry.is_some() {
            return (entry, has_unsatisfied_dependencies);
        }

        if use_stealing {
            for peer in table {
                let (entry, unsatisfied) = peer.queue.pop_runnable(self.index, observer);
                has_unsatisfied_dependencies |= unsatisfied;

                if let Some(entry) = entry {
                    if peer.index != self.index {
                        (observer)(JobEvent::JobStolen, self.index, Some(&entry.state));
                    }
                    return (Some(entry), has_unsatisfied_dependencies);
                }
            }
        }

        (None, has_unsatisfied_dependencies)
    }

    pub(crate) fn request_stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    fn should_stop(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    pub(crate) fn has_shut_down(&self) -> bool {
        self.has_shut_down.load(Ordering::Acquire)
    }
}

/// Runs one entry on the current thread and completes its state.
///
/// `set_done` is reached even when the callable panics, so dependants never
/// stall on a faulted predecessor. `completion_event` is `JobRun` on a
/// worker and `JobRunAssisted` on an assisting caller thread.
pub(crate) fn run_job(
    entry: JobQueueEntry,
    executor_index: usize,
    completion_event: JobEvent,
    observer: &JobEventObserver,
) {
    let JobQueueEntry { delegate, state } = entry;

    (observer)(JobEvent::JobStart, executor_index, Some(&state));
    if panic::catch_unwind(AssertUnwindSafe(delegate)).is_err() {
        error!(job = state.id(), "job callable panicked");
    }
    (observer)(JobEvent::JobDone, executor_index, Some(&state));

    state.set_done();

    (observer)(completion_event, executor_index, Some(&state));

    SIGNAL_HUB.notify_one();
}

/// A worker: shared core plus the thread draining it.
pub(crate) struct Worker {
    core: Arc<WorkerCore>,
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    /// Spawns the worker thread with a reference to the shared worker table.
    pub(crate) fn start(
        core: Arc<WorkerCore>,
        table: Arc<Vec<Arc<WorkerCore>>>,
        observer: JobEventObserver,
    ) -> io::Result<Worker> {
        let thread_core = core.clone();
        let thread = thread::Builder::new()
            .name(core.desc.name.clone())
            .spawn(move || worker_thread(thread_core, table, observer))?;

        Ok(Worker {
            core,
            thread: Some(thread),
        })
    }

    /// Signals the thread to stop, broadcasts the condition variable until
    /// the thread acknowledges, then joins it.
    pub(crate) fn shutdown(&mut self) {
        self.core.request_stop();

        while !self.core.has_shut_down() {
            SIGNAL_HUB.notify_all();

            thread::sleep(Duration::from_micros(100));
        }

        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!(worker = self.core.index, "worker thread panicked");
            }
        }
    }
}

fn worker_thread(
    core: Arc<WorkerCore>,
    table: Arc<Vec<Arc<WorkerCore>>>,
    observer: JobEventObserver,
) {
    apply_affinity(&core.desc);
    debug!(worker = core.index, name = %core.desc.name, "worker thread started");

    loop {
        let mut popped = None;
        {
            let mut signal = SIGNAL_HUB.lock();

            while !core.should_stop() {
                let (entry, _has_unsatisfied_dependencies) =
                    core.pop_next(&table, core.desc.enable_work_stealing, &observer);

                if let Some(entry) = entry {
                    popped = Some(entry);
                    break;
                }

                SIGNAL_HUB.wait(&mut signal);
                (observer)(JobEvent::WorkerAwoken, core.index, None);
            }
        }

        let Some(entry) = popped else {
            core.has_shut_down.store(true, Ordering::Release);
            debug!(worker = core.index, "worker thread stopped");

            return;
        };

        SIGNAL_HUB.worker_active();
        (observer)(JobEvent::WorkerUsed, core.index, None);

        run_job(entry, core.index, JobEvent::JobRun, &observer);

        SIGNAL_HUB.worker_idle();
    }
}

/// Pins the current thread to the lowest core allowed by the descriptor's
/// affinity mask. Best-effort: failures are logged and ignored.
fn apply_affinity(desc: &JobWorkerDescriptor) {
    if desc.affinity == u64::MAX {
        return;
    }

    let Some(cores) = core_affinity::get_core_ids() else {
        warn!(worker = %desc.name, "could not enumerate cores for affinity");
        return;
    };

    let target = cores
        .into_iter()
        .find(|core| core.id < 64 && desc.affinity & (1u64 << core.id) != 0);

    match target {
        Some(core) => {
            if !core_affinity::set_for_current(core) {
                warn!(worker = %desc.name, core = core.id, "failed to apply affinity");
            }
        }
        None => {
            warn!(worker = %desc.name, affinity = desc.affinity, "affinity mask matches no core");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profiling::JobEventObserver;
    use parking_lot::Mutex;

    fn no_op_observer() -> JobEventObserver {
        Arc::new(|_, _, _| {})
    }

    #[test]
    fn test_push_creates_idle_state() {
        let core = WorkerCore::new(0, JobWorkerDescriptor::default());
        let state = core.push(Box::new(|| {}), 'p');

        assert!(!state.is_done());
        assert_eq!(state.tag(), 'p');
        assert_eq!(core.queue.len(), 1);
    }

    #[test]
    fn test_pop_next_steals_from_peer() {
        let table: Vec<_> = (0..2)
            .map(|i| Arc::new(WorkerCore::new(i, JobWorkerDescriptor::default())))
            .collect();
        let state = table[1].push(Box::new(|| {}), '\0');
        state.set_ready();

        let events = Arc::new(Mutex::new(Vec::new()));
        let seen = events.clone();
        let observer: JobEventObserver =
            Arc::new(move |event, worker, _| seen.lock().push((event, worker)));

        let (entry, _) = table[0].pop_next(&table, true, &observer);
        assert!(entry.is_some());
        assert!(events.lock().contains(&(JobEvent::JobStolen, 0)));
    }

    #[test]
    fn test_pop_next_does_not_steal_when_disabled() {
        let table: Vec<_> = (0..2)
            .map(|i| Arc::new(WorkerCore::new(i, JobWorkerDescriptor::default())))
            .collect();
        let state = table[1].push(Box::new(|| {}), '\0');
        state.set_ready();

        let (entry, _) = table[0].pop_next(&table, false, &no_op_observer());
        assert!(entry.is_none());
        assert_eq!(table[1].queue.len(), 1);
    }

    #[test]
    fn test_run_job_completes_state_even_on_panic() {
        let state = JobState::new('\0');
        let dependant = JobState::new('\0');
        state.add_dependant(&dependant);
        dependant.set_ready();

        let entry = JobQueueEntry {
            delegate: Box::new(|| panic!("boom")),
            state: state.clone(),
        };

        run_job(entry, 0, JobEvent::JobRun, &no_op_observer());

        assert!(state.is_done());
        assert!(dependant.are_dependencies_met());
    }
}
