//! Profiling events, counters, and per-worker timelines.
//!
//! The event observer is the only coupling between the execution core and
//! profiling. Formatting the collected data (ASCII timelines and the like)
//! is a host concern; the manager exposes snapshots instead.

use crate::state::JobHandle;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Events emitted by workers and the assist paths.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobEvent {
    /// A job was popped from a queue.
    JobPopped,
    /// A job is about to start.
    JobStart,
    /// A job's callable just returned.
    JobDone,
    /// A job has been completed by a worker.
    JobRun,
    /// A job has been completed through outside assistance.
    JobRunAssisted,
    /// A worker took a job from another worker's queue.
    JobStolen,
    /// A worker woke from the global condition variable.
    WorkerAwoken,
    /// A worker started executing a job.
    WorkerUsed,
}

/// Observer callback: `(event, worker_index, job)`.
///
/// `worker_index` equals the worker count when the event originated on the
/// assist thread. The handle is present for job-scoped events and carries
/// the job id and debug tag.
pub type JobEventObserver = Arc<dyn Fn(JobEvent, usize, Option<&JobHandle>) + Send + Sync>;

/// One executed job on a worker's (or the assist thread's) timeline.
#[derive(Clone, Copy, Debug)]
pub struct TimelineEntry {
    pub job_id: usize,
    pub tag: char,
    pub start: Instant,
    pub end: Option<Instant>,
}

/// Start/end times of every job a thread has executed, in order.
#[derive(Clone, Debug, Default)]
pub struct ProfilingTimeline {
    pub entries: Vec<TimelineEntry>,
}

/// Snapshot of the manager's profiling counters.
#[derive(Clone, Copy, Debug, Default)]
pub struct JobSystemStats {
    /// Jobs completed, including assisted ones. May be less than jobs
    /// submitted if entries were cancelled or left queued at shutdown.
    pub jobs_run: usize,
    /// Jobs taken from a peer worker's queue.
    pub jobs_stolen: usize,
    /// Jobs completed on an assisting caller thread.
    pub jobs_assisted: usize,
    /// Bit per worker that has executed at least one job.
    pub used_mask: u64,
    /// Bit per worker that has been awoken at least once.
    pub awoken_mask: u64,
    /// When the first job was popped, if any.
    pub first_job_at: Option<Instant>,
}

fn worker_bit(index: usize) -> u64 {
    // Saturates past 64 workers rather than wrapping into low bits.
    1u64.checked_shl(index as u32).unwrap_or(0)
}

/// Counters, masks, and timelines updated by the manager's observer.
pub(crate) struct ProfilingState {
    jobs_run: AtomicUsize,
    jobs_stolen: AtomicUsize,
    jobs_assisted: AtomicUsize,
    used_mask: AtomicU64,
    awoken_mask: AtomicU64,

    /// One timeline per worker, plus a final slot for the assist thread.
    timelines: Mutex<Vec<ProfilingTimeline>>,
    first_job: Mutex<Option<Instant>>,
}

impl ProfilingState {
    pub(crate) fn new(timeline_slots: usize) -> Self {
        ProfilingState {
            jobs_run: AtomicUsize::new(0),
            jobs_stolen: AtomicUsize::new(0),
            jobs_assisted: AtomicUsize::new(0),
            used_mask: AtomicU64::new(0),
            awoken_mask: AtomicU64::new(0),
            timelines: Mutex::new(vec![ProfilingTimeline::default(); timeline_slots]),
            first_job: Mutex::new(None),
        }
    }

    pub(crate) fn record(&self, event: JobEvent, worker: usize, job: Option<&JobHandle>) {
        match event {
            JobEvent::JobRun => {
                self.jobs_run.fetch_add(1, Ordering::Relaxed);
            }
            JobEvent::JobStolen => {
                self.jobs_stolen.fetch_add(1, Ordering::Relaxed);
            }
            JobEvent::JobRunAssisted => {
                self.jobs_assisted.fetch_add(1, Ordering::Relaxed);
                self.jobs_run.fetch_add(1, Ordering::Relaxed);
            }
            JobEvent::WorkerAwoken => {
                self.awoken_mask.fetch_or(worker_bit(worker), Ordering::Relaxed);
            }
            JobEvent::WorkerUsed => {
                self.used_mask.fetch_or(worker_bit(worker), Ordering::Relaxed);
            }
            JobEvent::JobStart => {
                let mut timelines = self.timelines.lock();
                let slot = worker.min(timelines.len().saturating_sub(1));
                timelines[slot].entries.push(TimelineEntry {
                    job_id: job.map(|state| state.id()).unwrap_or(0),
                    tag: job.map(|state| state.tag()).unwrap_or('\0'),
                    start: Instant::now(),
                    end: None,
                });
            }
            JobEvent::JobDone => {
                let mut timelines = self.timelines.lock();
                let slot = worker.min(timelines.len().saturating_sub(1));
                if let Some(entry) = timelines[slot].entries.last_mut() {
                    entry.end = Some(Instant::now());
                }
            }
            JobEvent::JobPopped => {
                let mut first_job = self.first_job.lock();
                if first_job.is_none() {
                    *first_job = Some(Instant::now());
                }
            }
        }
    }

    pub(crate) fn stats(&self) -> JobSystemStats {
        JobSystemStats {
            jobs_run: self.jobs_run.load(Ordering::Acquire),
            jobs_stolen: self.jobs_stolen.load(Ordering::Acquire),
            jobs_assisted: self.jobs_assisted.load(Ordering::Acquire),
            used_mask: self.used_mask.load(Ordering::Acquire),
            awoken_mask: self.awoken_mask.load(Ordering::Acquire),
            first_job_at: *self.first_job.lock(),
        }
    }

    pub(crate) fn timelines(&self) -> Vec<ProfilingTimeline> {
        self.timelines.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::JobState;

    #[test]
    fn test_run_and_steal_counters() {
        let profiling = ProfilingState::new(3);
        profiling.record(JobEvent::JobRun, 0, None);
        profiling.record(JobEvent::JobStolen, 1, None);
        profiling.record(JobEvent::JobRunAssisted, 2, None);

        let stats = profiling.stats();
        assert_eq!(stats.jobs_run, 2);
        assert_eq!(stats.jobs_stolen, 1);
        assert_eq!(stats.jobs_assisted, 1);
    }

    #[test]
    fn test_worker_masks() {
        let profiling = ProfilingState::new(3);
        profiling.record(JobEvent::WorkerUsed, 0, None);
        profiling.record(JobEvent::WorkerAwoken, 1, None);

        let stats = profiling.stats();
        assert_eq!(stats.used_mask, 0b01);
        assert_eq!(stats.awoken_mask, 0b10);
    }

    #[test]
    fn test_mask_saturates_past_64_workers() {
        assert_eq!(worker_bit(64), 0);
        assert_eq!(worker_bit(63), 1 << 63);
    }

    #[test]
    fn test_timeline_records_job_span() {
        let profiling = ProfilingState::new(2);
        let state = JobState::new('x');

        profiling.record(JobEvent::JobStart, 0, Some(&state));
        profiling.record(JobEvent::JobDone, 0, Some(&state));

        let timelines = profiling.timelines();
        assert_eq!(timelines[0].entries.len(), 1);
        let entry = &timelines[0].entries[0];
        assert_eq!(entry.job_id, state.id());
        assert_eq!(entry.tag, 'x');
        assert!(entry.end.is_some());
    }

    #[test]
    fn test_assist_events_land_in_last_slot() {
        let profiling = ProfilingState::new(3);
        let state = JobState::new('\0');

        // Worker index equal to the worker count denotes the assist thread.
        profiling.record(JobEvent::JobStart, 2, Some(&state));

        let timelines = profiling.timelines();
        assert_eq!(timelines[2].entries.len(), 1);
    }
}
