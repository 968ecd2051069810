//! The job manager: owns the worker pool and dispatches work.
//!
//! Jobs are submitted round-robin across workers and are inert until their
//! state is marked ready, either directly or through
//! [`JobChainBuilder::go`](crate::builder::JobChainBuilder::go). The
//! submitting thread can assist in draining work instead of blocking.

use crate::profiling::{
    JobEvent, JobEventObserver, JobSystemStats, ProfilingState, ProfilingTimeline,
};
use crate::queue::JobQueueEntry;
use crate::signal::SIGNAL_HUB;
use crate::state::JobHandle;
use crate::worker::{run_job, JobWorkerDescriptor, Worker, WorkerCore};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

const ASSIST_IDLE_SLEEP: Duration = Duration::from_micros(100);

/// Configuration for the manager: one descriptor per worker to spawn, plus
/// an optional external observer fed every profiling event.
#[derive(Clone, Default)]
pub struct JobManagerDescriptor {
    pub workers: Vec<JobWorkerDescriptor>,
    pub observer: Option<JobEventObserver>,
}

impl JobManagerDescriptor {
    /// A descriptor with `count` identical default workers.
    pub fn uniform(count: usize) -> Self {
        JobManagerDescriptor {
            workers: vec![JobWorkerDescriptor::default(); count],
            observer: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum CreateError {
    #[error("job manager descriptor contains no workers")]
    NoWorkers,
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Owns the worker pool and acts as the primary interface to the job queue.
pub struct JobManager {
    workers: Vec<Worker>,
    table: Arc<Vec<Arc<WorkerCore>>>,
    next_round_robin: AtomicUsize,
    profiling: Arc<ProfilingState>,
    observer: JobEventObserver,
}

impl JobManager {
    /// An empty manager. Call [`JobManager::create`] to spawn workers.
    pub fn new() -> Self {
        JobManager {
            workers: Vec::new(),
            table: Arc::new(Vec::new()),
            next_round_robin: AtomicUsize::new(0),
            profiling: Arc::new(ProfilingState::new(1)),
            observer: Arc::new(|_, _, _| {}),
        }
    }

    /// Spawns the pool described by `desc`, shutting down any prior pool
    /// first. On error no workers remain running.
    pub fn create(&mut self, desc: &JobManagerDescriptor) -> Result<(), CreateError> {
        self.shutdown(false);

        if desc.workers.is_empty() {
            return Err(CreateError::NoWorkers);
        }

        let worker_count = desc.workers.len();

        // One timeline per worker, plus a slot for the assist thread.
        let profiling = Arc::new(ProfilingState::new(worker_count + 1));
        let observer = {
            let profiling = profiling.clone();
            let external = desc.observer.clone();
            let observer: JobEventObserver = Arc::new(move |event, worker, job| {
                profiling.record(event, worker, job);
                if let Some(external) = &external {
                    external(event, worker, job);
                }
            });
            observer
        };

        let table: Arc<Vec<Arc<WorkerCore>>> = Arc::new(
            desc.workers
                .iter()
                .enumerate()
                .map(|(index, worker_desc)| {
                    Arc::new(WorkerCore::new(index, worker_desc.clone()))
                })
                .collect(),
        );

        let mut workers = Vec::with_capacity(worker_count);
        for core in table.iter() {
            match Worker::start(core.clone(), table.clone(), observer.clone()) {
                Ok(worker) => workers.push(worker),
                Err(err) => {
                    for worker in &mut workers {
                        worker.shutdown();
                    }
                    return Err(CreateError::Spawn(err));
                }
            }
        }

        self.workers = workers;
        self.table = table;
        self.next_round_robin.store(0, Ordering::Relaxed);
        self.profiling = profiling;
        self.observer = observer;

        info!(workers = worker_count, "job manager created");

        Ok(())
    }

    /// Submits a job to the next worker, round-robin. The job will not run
    /// until its state is marked ready.
    ///
    /// # Panics
    ///
    /// Panics if the manager has no workers; submitting after shutdown is a
    /// programming error.
    pub fn add_job<F>(&self, delegate: F) -> JobHandle
    where
        F: FnOnce() + Send + 'static,
    {
        self.add_job_tagged(delegate, '\0')
    }

    /// Like [`JobManager::add_job`], with a single-character debug tag for
    /// profiling displays.
    pub fn add_job_tagged<F>(&self, delegate: F, tag: char) -> JobHandle
    where
        F: FnOnce() + Send + 'static,
    {
        assert!(
            !self.table.is_empty(),
            "add_job called on a job manager with no workers"
        );

        // Work-stealing load-balances whatever round-robin gets wrong, as
        // long as it hasn't been disabled on the descriptor.
        let index = self.next_round_robin.fetch_add(1, Ordering::Relaxed) % self.table.len();

        self.table[index].push(Box::new(delegate), tag)
    }

    /// Submits a job directly onto a specific worker's queue, bypassing
    /// round-robin dispatch.
    pub fn add_job_pinned<F>(&self, worker: usize, delegate: F, tag: char) -> JobHandle
    where
        F: FnOnce() + Send + 'static,
    {
        assert!(
            worker < self.table.len(),
            "add_job_pinned worker index out of range"
        );

        self.table[worker].push(Box::new(delegate), tag)
    }

    /// Runs stealable jobs on the calling thread until `state` completes.
    ///
    /// The target must already be marked ready, otherwise nothing can make
    /// progress on it and this call would spin forever.
    pub fn assist_until_job_done(&self, state: &JobHandle) {
        assert!(
            state.is_ready(),
            "assist_until_job_done requires a job that has been marked ready"
        );
        assert!(!self.table.is_empty());

        let assist_index = self.table.len();

        while !state.is_done() {
            if let Some(entry) = self.steal_any(assist_index) {
                run_job(entry, assist_index, JobEvent::JobRunAssisted, &self.observer);
            } else {
                // Nothing stealable: the target is either running on a
                // worker right now, or this thread took the only job.
                thread::sleep(ASSIST_IDLE_SLEEP);
            }
        }
    }

    /// Runs jobs on the calling thread until every queue is drained.
    ///
    /// A pass counts as busy while any queue still holds an entry with
    /// unsatisfied dependencies, so this returns only once the whole
    /// frontier has completed.
    pub fn assist_until_done(&self) {
        let assist_index = self.table.len();

        loop {
            let mut popped = false;
            let mut has_unsatisfied_dependencies = false;

            for core in self.table.iter() {
                let (entry, unsatisfied) =
                    core.queue.pop_runnable(assist_index, &self.observer);
                has_unsatisfied_dependencies |= unsatisfied;

                if let Some(entry) = entry {
                    run_job(entry, assist_index, JobEvent::JobRunAssisted, &self.observer);
                    popped = true;
                    break;
                }
            }

            if popped {
                continue;
            }
            if !has_unsatisfied_dependencies {
                break;
            }

            thread::yield_now();
        }

        debug_assert!(self.table.iter().all(|core| core.queue.is_empty()));
    }

    /// Stops the pool. With `finish_jobs` the caller first drains every
    /// queue by assisting; otherwise un-popped entries are discarded.
    pub fn shutdown(&mut self, finish_jobs: bool) {
        if self.workers.is_empty() {
            return;
        }

        if finish_jobs {
            self.assist_until_done();
        }

        debug!(workers = self.workers.len(), "shutting down job manager");

        // Stop and join every thread before dropping any worker state, so a
        // thief can never observe a dismantled peer.
        for worker in &mut self.workers {
            worker.shutdown();
        }

        self.workers.clear();
        self.table = Arc::new(Vec::new());
    }

    pub fn worker_count(&self) -> usize {
        self.table.len()
    }

    /// Number of workers currently executing a job, process-wide.
    pub fn active_workers(&self) -> usize {
        SIGNAL_HUB.active_workers()
    }

    /// Snapshot of the profiling counters and masks.
    pub fn stats(&self) -> JobSystemStats {
        self.profiling.stats()
    }

    /// Snapshot of the per-worker timelines. The final timeline tracks jobs
    /// executed by assisting caller threads.
    pub fn timelines(&self) -> Vec<ProfilingTimeline> {
        self.profiling.timelines()
    }

    fn steal_any(&self, assist_index: usize) -> Option<JobQueueEntry> {
        for core in self.table.iter() {
            let (entry, _) = core.queue.pop_runnable(assist_index, &self.observer);
            if entry.is_some() {
                return entry;
            }
        }

        None
    }
}

impl Default for JobManager {
    fn default() -> Self {
        JobManager::new()
    }
}

impl Drop for JobManager {
    fn drop(&mut self) {
        self.shutdown(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn test_create_with_no_workers_fails() {
        let mut manager = JobManager::new();
        let result = manager.create(&JobManagerDescriptor::default());
        assert!(matches!(result, Err(CreateError::NoWorkers)));
        assert_eq!(manager.worker_count(), 0);
    }

    #[test]
    fn test_create_spawns_described_workers() {
        let mut manager = JobManager::new();
        manager.create(&JobManagerDescriptor::uniform(3)).unwrap();
        assert_eq!(manager.worker_count(), 3);
        manager.shutdown(false);
        assert_eq!(manager.worker_count(), 0);
    }

    #[test]
    fn test_create_replaces_previous_pool() {
        let mut manager = JobManager::new();
        manager.create(&JobManagerDescriptor::uniform(2)).unwrap();
        manager.create(&JobManagerDescriptor::uniform(4)).unwrap();
        assert_eq!(manager.worker_count(), 4);
    }

    #[test]
    fn test_unready_job_does_not_run() {
        let mut manager = JobManager::new();
        manager.create(&JobManagerDescriptor::uniform(1)).unwrap();

        let ran = Arc::new(AtomicBool::new(false));
        let ran_in_job = ran.clone();
        let state = manager.add_job(move || ran_in_job.store(true, Ordering::SeqCst));

        thread::sleep(Duration::from_millis(5));
        assert!(!ran.load(Ordering::SeqCst));
        assert!(!state.is_done());
    }

    #[test]
    #[should_panic(expected = "no workers")]
    fn test_add_job_without_workers_panics() {
        let manager = JobManager::new();
        let _ = manager.add_job(|| {});
    }
}
