//! Fluent builder for job dependency graphs.
//!
//! Expresses sequences, fan-out groups, and joins as a chained description
//! and releases the whole graph atomically with [`JobChainBuilder::go`]:
//!
//! ```no_run
//! use jobforge::{JobChainBuilder, JobManager, JobManagerDescriptor};
//!
//! let mut manager = JobManager::new();
//! manager.create(&JobManagerDescriptor::uniform(4)).unwrap();
//!
//! let mut chain = JobChainBuilder::<256>::new(&manager);
//! chain
//!     .job_tagged(|| println!("something"), 'a')
//!     .then()
//!     .job_tagged(|| println!("something after that"), 'b')
//!     .then()
//!     .together()
//!     .job(|| println!("thing 1"))
//!     .job(|| println!("thing 2"))
//!     .job(|| println!("thing 3"))
//!     .close()
//!     .then()
//!     .job_tagged(|| println!("final stuff"), 'Z')
//!     .go();
//! chain.assist_and_wait();
//! ```
//!
//! The node pool is bounded; overflowing it cancels every job created so
//! far and latches [`JobChainBuilder::failed`].

use crate::manager::JobManager;
use crate::state::JobHandle;
use tracing::warn;

#[derive(Default)]
struct Node {
    job: Option<JobHandle>,
    /// For group nodes, the dependency cursor captured when the group was
    /// opened; each group member depends on it.
    group_dependency: Option<usize>,
    is_group: bool,
}

/// Builds a dependency DAG of jobs, bounded by `MAX_NODES` including one
/// sentinel root node. Jobs are submitted as the chain is described but stay
/// inert until [`JobChainBuilder::go`] releases them in insertion order.
pub struct JobChainBuilder<'m, const MAX_NODES: usize = 256> {
    manager: &'m JobManager,

    nodes: Vec<Node>,
    stack: Vec<usize>,
    all_jobs: Vec<JobHandle>,

    /// Most recently added item, promoted to a dependency by `then`.
    last: Option<usize>,
    /// Item the next addition will depend on, as dictated by `then`.
    dependency: Option<usize>,

    failed: bool,
}

impl<'m, const MAX_NODES: usize> JobChainBuilder<'m, MAX_NODES> {
    pub fn new(manager: &'m JobManager) -> Self {
        let mut builder = JobChainBuilder {
            manager,
            nodes: Vec::with_capacity(MAX_NODES),
            stack: Vec::new(),
            all_jobs: Vec::new(),
            last: None,
            dependency: None,
            failed: false,
        };

        // Sentinel root node so the stack is never empty.
        match builder.alloc_node() {
            Some(root) => builder.stack.push(root),
            None => builder.failed = true,
        }

        builder
    }

    fn alloc_node(&mut self) -> Option<usize> {
        if self.nodes.len() >= MAX_NODES {
            return None;
        }

        self.nodes.push(Node::default());

        Some(self.nodes.len() - 1)
    }

    /// Adds a job to the chain.
    pub fn job<F>(&mut self, delegate: F) -> &mut Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.job_tagged(delegate, '\0')
    }

    /// Adds a job with a debug tag. Depends on the current dependency
    /// cursor, if `then` set one; inside a group it also becomes a
    /// predecessor of the group's join job.
    pub fn job_tagged<F>(&mut self, delegate: F, tag: char) -> &mut Self
    where
        F: FnOnce() + Send + 'static,
    {
        if self.failed {
            return self;
        }

        let owner = self.stack.last().copied();

        let Some(item) = self.alloc_node() else {
            self.fail();
            return self;
        };

        let job = self.manager.add_job_tagged(delegate, tag);
        self.all_jobs.push(job.clone());

        if let Some(dependency) = self.dependency.take() {
            if let Some(dependency_job) = &self.nodes[dependency].job {
                dependency_job.add_dependant(&job);
            }
        }

        if let Some(owner) = owner {
            if self.nodes[owner].is_group {
                if let Some(join_job) = &self.nodes[owner].job {
                    job.add_dependant(join_job);
                }

                if let Some(group_dependency) = self.nodes[owner].group_dependency {
                    if let Some(group_dependency_job) = &self.nodes[group_dependency].job {
                        group_dependency_job.add_dependant(&job);
                    }
                }
            }
        }

        self.nodes[item].job = Some(job);
        self.last = Some(item);

        self
    }

    /// Promotes the last added item to the dependency cursor for the next
    /// addition. The "last" pointer falls back to the item's group
    /// dependency to support chaining out of nested groups.
    pub fn then(&mut self) -> &mut Self {
        if self.failed {
            return self;
        }

        self.dependency = self.last;
        self.last = self
            .dependency
            .and_then(|dependency| self.nodes[dependency].group_dependency);

        self
    }

    /// Opens a fan-out group.
    pub fn together(&mut self) -> &mut Self {
        self.together_tagged('\0')
    }

    /// Opens a fan-out group whose empty join job carries `tag`. Jobs added
    /// until the matching [`JobChainBuilder::close`] become predecessors of
    /// the join job, and each also inherits the dependency cursor captured
    /// here.
    pub fn together_tagged(&mut self, tag: char) -> &mut Self {
        if self.failed {
            return self;
        }

        let Some(item) = self.alloc_node() else {
            self.fail();
            return self;
        };

        let join_job = self.manager.add_job_tagged(|| {}, tag);
        self.all_jobs.push(join_job.clone());

        self.nodes[item].is_group = true;
        self.nodes[item].group_dependency = self.dependency.take();
        self.nodes[item].job = Some(join_job);

        self.last = Some(item);
        self.stack.push(item);

        self
    }

    /// Closes the innermost group; the group's join job becomes the new
    /// "last" item for chaining.
    pub fn close(&mut self) -> &mut Self {
        if self.failed {
            return self;
        }

        if let Some(&owner) = self.stack.last() {
            if self.nodes[owner].is_group {
                self.last = Some(owner);
            }
        }

        self.dependency = None;

        if self.stack.len() > 1 {
            self.stack.pop();
        }

        self
    }

    /// Releases every created job for execution, in insertion order.
    pub fn go(&mut self) -> &mut Self {
        if self.failed {
            return self;
        }

        for job in &self.all_jobs {
            job.set_ready();
        }

        self
    }

    /// Cancels every created job and latches the failed flag. Invoked
    /// automatically when the node pool is exhausted.
    pub fn fail(&mut self) {
        warn!(
            jobs = self.all_jobs.len(),
            capacity = MAX_NODES,
            "job chain failed; cancelling all jobs"
        );

        for job in &self.all_jobs {
            job.cancel();
        }

        self.failed = true;
    }

    pub fn failed(&self) -> bool {
        self.failed
    }

    /// Every job created by this chain, in insertion order. Join jobs of
    /// groups are included.
    pub fn jobs(&self) -> &[JobHandle] {
        &self.all_jobs
    }

    /// Drains the whole frontier on the calling thread. Call after
    /// [`JobChainBuilder::go`].
    pub fn assist_and_wait(&self) {
        self.manager.assist_until_done();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::JobManagerDescriptor;

    fn manager_with_workers(count: usize) -> JobManager {
        let mut manager = JobManager::new();
        manager.create(&JobManagerDescriptor::uniform(count)).unwrap();
        manager
    }

    // The wiring tests below never mark jobs ready, so the live workers
    // cannot race the assertions; completion is simulated with set_done.

    #[test]
    fn test_then_wires_a_dependency() {
        let manager = manager_with_workers(1);
        let mut chain = JobChainBuilder::<8>::new(&manager);
        chain.job(|| {}).then().job(|| {});

        let jobs = chain.jobs();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].dependency_count(), 0);
        assert_eq!(jobs[1].dependency_count(), 1);

        jobs[0].set_done();
        assert_eq!(jobs[1].dependency_count(), 0);
    }

    #[test]
    fn test_group_members_gate_the_join_job() {
        let manager = manager_with_workers(1);
        let mut chain = JobChainBuilder::<8>::new(&manager);
        chain.together().job(|| {}).job(|| {}).close();

        // Join job first, then the two members.
        let jobs: Vec<_> = chain.jobs().to_vec();
        assert_eq!(jobs.len(), 3);
        assert_eq!(jobs[0].dependency_count(), 2);

        jobs[1].set_done();
        jobs[2].set_done();
        assert_eq!(jobs[0].dependency_count(), 0);
    }

    #[test]
    fn test_group_members_inherit_captured_dependency() {
        let manager = manager_with_workers(1);
        let mut chain = JobChainBuilder::<8>::new(&manager);
        chain.job(|| {}).then().together().job(|| {}).job(|| {}).close();

        let jobs: Vec<_> = chain.jobs().to_vec();
        // predecessor, join, member, member
        assert_eq!(jobs.len(), 4);
        assert_eq!(jobs[1].dependency_count(), 2);
        assert_eq!(jobs[2].dependency_count(), 1);
        assert_eq!(jobs[3].dependency_count(), 1);

        jobs[0].set_done();
        assert_eq!(jobs[2].dependency_count(), 0);
        assert_eq!(jobs[3].dependency_count(), 0);
    }

    #[test]
    fn test_chaining_out_of_a_group() {
        let manager = manager_with_workers(1);
        let mut chain = JobChainBuilder::<8>::new(&manager);
        chain
            .together()
            .job(|| {})
            .close()
            .then()
            .job(|| {});

        // join, member, successor: the successor depends on the join job.
        let jobs: Vec<_> = chain.jobs().to_vec();
        assert_eq!(jobs.len(), 3);
        assert_eq!(jobs[2].dependency_count(), 1);

        jobs[0].set_done();
        assert_eq!(jobs[2].dependency_count(), 0);
    }

    #[test]
    fn test_pool_exhaustion_cancels_everything() {
        let manager = manager_with_workers(1);
        let mut chain = JobChainBuilder::<4>::new(&manager);
        for _ in 0..10 {
            chain.job(|| {});
        }

        assert!(chain.failed());
        for job in chain.jobs() {
            assert!(job.awaiting_cancellation());
        }
        // The sentinel occupies one slot, so only three jobs were created.
        assert_eq!(chain.jobs().len(), 3);
    }

    #[test]
    fn test_go_after_failure_is_a_no_op() {
        let manager = manager_with_workers(1);
        let mut chain = JobChainBuilder::<2>::new(&manager);
        chain.job(|| {}).job(|| {}).go();

        assert!(chain.failed());
        for job in chain.jobs() {
            assert!(!job.is_ready());
        }
    }
}
