//! # jobforge - Work-Stealing Job Scheduler
//!
//! An in-process parallelism substrate for interactive real-time
//! applications (games, simulators, media pipelines) where bursts of
//! independent or partially-ordered work must be dispatched across a fixed
//! pool of worker threads with minimal latency.
//!
//! ## Architecture
//!
//! - **Job states**: shared handles carrying readiness, completion,
//!   cancellation, and dependency counters
//! - **Worker threads**: each owns a private queue, pops its own work first
//!   and steals from peers when idle
//! - **Job manager**: dispatches jobs round-robin, lets the submitting
//!   thread assist in draining work, and collects profiling events
//! - **Chain builder**: describes sequences, fan-out groups, and joins as a
//!   fluent chain, released atomically for execution
//!
//! ## Example
//!
//! ```no_run
//! use jobforge::{JobChainBuilder, JobManager, JobManagerDescriptor};
//!
//! let mut manager = JobManager::new();
//! manager.create(&JobManagerDescriptor::uniform(4)).unwrap();
//!
//! let mut chain = JobChainBuilder::<256>::new(&manager);
//! chain
//!     .job(|| println!("load assets"))
//!     .then()
//!     .together()
//!     .job(|| println!("decode chunk 0"))
//!     .job(|| println!("decode chunk 1"))
//!     .close()
//!     .then()
//!     .job(|| println!("present"))
//!     .go();
//! chain.assist_and_wait();
//!
//! manager.shutdown(false);
//! ```

pub mod builder;
pub mod manager;
pub mod profiling;
mod queue;
mod signal;
pub mod state;
pub mod worker;

pub use builder::JobChainBuilder;
pub use manager::{CreateError, JobManager, JobManagerDescriptor};
pub use profiling::{
    JobEvent, JobEventObserver, JobSystemStats, ProfilingTimeline, TimelineEntry,
};
pub use state::{JobHandle, JobState};
pub use worker::JobWorkerDescriptor;
