//! Work items and the executors that run them.
//!
//! An [`Executor`] accepts [`Work`] for eventual execution. Callers never hold
//! an executor directly; they hold a [`KeepAlive`], a shared handle that grants
//! the right to submit work and keeps the executor alive for as long as the
//! handle exists. Dropping the last handle tears the executor down.
//!
//! Bundled executors:
//!
//! - [`InlineExecutor`]: runs work immediately on the submitting thread
//! - [`ManualExecutor`]: queues work until the owner drains it
//! - [`ThreadPool`](pool::ThreadPool): fixed set of worker threads
//! - [`DeferredExecutor`](deferred::DeferredExecutor): holds work until a real
//!   executor is bound to it

pub mod deferred;
pub mod pool;

use crossbeam_queue::SegQueue;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A single deferred unit of computation.
///
/// Work is an opaque zero-argument closure that captures everything it needs.
/// It runs at most once: [`Work::run`] consumes it.
pub struct Work {
    func: Box<dyn FnOnce() + Send + 'static>,
}

impl Work {
    /// Wraps a closure as a work item.
    pub fn new<F>(func: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            func: Box::new(func),
        }
    }

    /// Runs the work on the current thread.
    pub fn run(self) {
        (self.func)();
    }
}

impl fmt::Debug for Work {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Work").finish_non_exhaustive()
    }
}

/// An execution context that accepts work.
///
/// `add` must not block the caller beyond the cost of enqueueing. Whether the
/// work runs before `add` returns is up to the implementation.
pub trait Executor: Send + Sync + 'static {
    /// Submits work for eventual execution.
    fn add(&self, work: Work);
}

/// Shared handle to an executor.
///
/// Cloning acquires another hold on the executor, dropping releases one. The
/// executor is torn down when the last hold is released.
#[derive(Clone)]
pub struct KeepAlive {
    executor: Arc<dyn Executor>,
}

impl KeepAlive {
    /// Creates a handle that owns `executor`.
    pub fn new<E: Executor>(executor: Arc<E>) -> Self {
        Self { executor }
    }

    /// Creates a handle for an executor that needs no shared state.
    pub fn detached<E: Executor>(executor: E) -> Self {
        Self::new(Arc::new(executor))
    }

    /// Submits work to the executor behind this handle.
    pub fn add(&self, work: Work) {
        self.executor.add(work);
    }

    /// Returns true if both handles refer to the same executor.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        std::ptr::eq(
            Arc::as_ptr(&self.executor).cast::<()>(),
            Arc::as_ptr(&other.executor).cast::<()>(),
        )
    }

    /// Returns the number of live holds on the executor.
    #[must_use]
    pub fn holders(&self) -> usize {
        Arc::strong_count(&self.executor)
    }
}

impl fmt::Debug for KeepAlive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeepAlive")
            .field("holders", &self.holders())
            .finish()
    }
}

/// Acquires a keep-alive handle for a shared executor.
#[must_use]
pub fn keep_alive<E: Executor>(executor: &Arc<E>) -> KeepAlive {
    KeepAlive::new(Arc::clone(executor))
}

/// Runs every work item immediately on the submitting thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineExecutor;

impl InlineExecutor {
    /// Returns a keep-alive handle to a fresh inline executor.
    #[must_use]
    pub fn keep_alive() -> KeepAlive {
        KeepAlive::detached(Self)
    }
}

impl Executor for InlineExecutor {
    fn add(&self, work: Work) {
        work.run();
    }
}

/// Queues work until its owner drains it.
///
/// Useful when the exact moment work runs matters: nothing submitted here
/// executes until [`run_one`](Self::run_one) or [`run_all`](Self::run_all) is
/// called.
#[derive(Default)]
pub struct ManualExecutor {
    queue: SegQueue<Work>,
    submitted: AtomicUsize,
}

impl ManualExecutor {
    /// Creates an empty executor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs the oldest queued work item, if any.
    ///
    /// Returns `true` if a work item ran.
    pub fn run_one(&self) -> bool {
        match self.queue.pop() {
            Some(work) => {
                work.run();
                true
            }
            None => false,
        }
    }

    /// Runs queued work until the queue is empty, including work enqueued by
    /// the work being run. Returns the number of items executed.
    pub fn run_all(&self) -> usize {
        let mut ran = 0;
        while self.run_one() {
            ran += 1;
        }
        ran
    }

    /// Number of work items waiting to run.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Total number of work items ever submitted.
    #[must_use]
    pub fn submitted(&self) -> usize {
        self.submitted.load(Ordering::Acquire)
    }
}

impl Executor for ManualExecutor {
    fn add(&self, work: Work) {
        self.submitted.fetch_add(1, Ordering::AcqRel);
        self.queue.push(work);
    }
}

impl fmt::Debug for ManualExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualExecutor")
            .field("pending", &self.pending())
            .field("submitted", &self.submitted())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn inline_executor_runs_before_add_returns() {
        init_test_logging();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);

        InlineExecutor::keep_alive().add(Work::new(move || flag.store(true, Ordering::SeqCst)));

        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn manual_executor_defers_until_drained() {
        init_test_logging();
        let exec = Arc::new(ManualExecutor::new());
        let handle = keep_alive(&exec);
        let count = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let count = Arc::clone(&count);
            handle.add(Work::new(move || {
                count.fetch_add(1, Ordering::SeqCst);
            }));
        }

        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(exec.pending(), 3);
        assert_eq!(exec.submitted(), 3);

        assert!(exec.run_one());
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(exec.run_all(), 2);
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert!(!exec.run_one());
    }

    #[test]
    fn manual_executor_runs_nested_submissions() {
        let exec = Arc::new(ManualExecutor::new());
        let handle = keep_alive(&exec);
        let inner = handle.clone();
        let hits = Arc::new(AtomicUsize::new(0));
        let outer_hits = Arc::clone(&hits);

        handle.add(Work::new(move || {
            outer_hits.fetch_add(1, Ordering::SeqCst);
            let nested_hits = Arc::clone(&outer_hits);
            inner.add(Work::new(move || {
                nested_hits.fetch_add(1, Ordering::SeqCst);
            }));
        }));

        assert_eq!(exec.run_all(), 2);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn keep_alive_tracks_holders_and_identity() {
        let exec = Arc::new(ManualExecutor::new());
        let a = keep_alive(&exec);
        let b = a.clone();
        let other = keep_alive(&Arc::new(ManualExecutor::new()));

        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&other));
        assert_eq!(a.holders(), 3);
        drop(b);
        assert_eq!(a.holders(), 2);
    }

    #[test]
    fn dropping_unrun_work_releases_captures() {
        let (tracked, drops) = crate::test_utils::DropCounter::new();
        let work = Work::new(move || drop(tracked));
        assert_eq!(drops.load(Ordering::SeqCst), 0);
        drop(work);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }
}
