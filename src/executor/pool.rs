//! Fixed-size thread pool executor.
//!
//! Work submitted through a pool's [`KeepAlive`] is pushed onto a lock-free
//! queue and picked up by one of `worker_threads` OS threads. Idle workers
//! park on a condition variable.
//!
//! # Shutdown
//!
//! [`ThreadPool::shutdown`] stops accepting work; workers drain what is
//! already queued and exit. Work added after shutdown is dropped with a
//! warning, which releases everything it captured (a promise captured by the
//! work fails with [`BrokenPromise`](crate::Error::BrokenPromise)).
//! Dropping the pool shuts it down and joins the workers.
//!
//! # Panics in Work
//!
//! A panic inside a work item is caught and logged; the worker keeps going.

use super::{keep_alive, Executor, KeepAlive, Work};
use crate::config::PoolConfig;
use crate::error::{ConfigError, PanicPayload};
use crate::tracing_compat::{debug, error, warn};
use crossbeam_queue::SegQueue;
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

struct PoolInner {
    queue: SegQueue<Work>,
    shutdown: AtomicBool,
    /// Number of work items queued but not yet started.
    pending: AtomicUsize,
    /// Number of work items that finished, panicking or not.
    completed: AtomicU64,
    /// Number of worker threads that have not exited yet.
    live_workers: AtomicUsize,
    mutex: Mutex<()>,
    condvar: Condvar,
}

impl PoolInner {
    fn notify_one(&self) {
        let _guard = self.mutex.lock();
        self.condvar.notify_one();
    }

    fn notify_all(&self) {
        let _guard = self.mutex.lock();
        self.condvar.notify_all();
    }

    fn enqueue(&self, work: Work) {
        self.pending.fetch_add(1, Ordering::AcqRel);
        self.queue.push(work);
        // Shutdown may have finished between the caller's check and the push,
        // leaving no worker to pick this up.
        if self.shutdown.load(Ordering::SeqCst) && self.live_workers.load(Ordering::SeqCst) == 0 {
            self.drain_stranded();
        } else {
            self.notify_one();
        }
    }

    /// Drops queued work that no worker will run.
    fn drain_stranded(&self) -> usize {
        let mut stranded = 0_usize;
        while let Some(work) = self.queue.pop() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            drop(work);
            stranded += 1;
        }
        if stranded > 0 {
            warn!(stranded, "thread pool dropped work queued during shutdown");
        }
        stranded
    }
}

impl Executor for PoolInner {
    fn add(&self, work: Work) {
        if self.shutdown.load(Ordering::Acquire) {
            warn!("thread pool is shut down, dropping work");
            drop(work);
            return;
        }
        self.enqueue(work);
    }
}

/// A fixed set of worker threads.
pub struct ThreadPool {
    inner: Arc<PoolInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
}

impl ThreadPool {
    /// Creates a pool with `worker_threads` workers and default naming.
    pub fn new(worker_threads: usize) -> Result<Self, ConfigError> {
        Self::with_config(PoolConfig::default().worker_threads(worker_threads))
    }

    /// Creates a pool from a validated configuration.
    pub fn with_config(config: PoolConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let inner = Arc::new(PoolInner {
            queue: SegQueue::new(),
            shutdown: AtomicBool::new(false),
            pending: AtomicUsize::new(0),
            completed: AtomicU64::new(0),
            live_workers: AtomicUsize::new(0),
            mutex: Mutex::new(()),
            condvar: Condvar::new(),
        });

        let mut workers = Vec::with_capacity(config.worker_threads);
        for index in 0..config.worker_threads {
            let worker_inner = Arc::clone(&inner);
            inner.live_workers.fetch_add(1, Ordering::SeqCst);
            let spawned = thread::Builder::new()
                .name(format!("{}-{index}", config.thread_name_prefix))
                .spawn(move || {
                    worker_loop(&worker_inner);
                    worker_inner.live_workers.fetch_sub(1, Ordering::SeqCst);
                });
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    inner.live_workers.fetch_sub(1, Ordering::SeqCst);
                    inner.shutdown.store(true, Ordering::SeqCst);
                    inner.notify_all();
                    for handle in workers {
                        let _ = handle.join();
                    }
                    return Err(ConfigError::ThreadSpawn(e.to_string()));
                }
            }
        }

        debug!(
            workers = config.worker_threads,
            prefix = %config.thread_name_prefix,
            "thread pool started"
        );

        Ok(Self {
            inner,
            workers: Mutex::new(workers),
            worker_count: config.worker_threads,
        })
    }

    /// Returns a keep-alive handle for submitting work to this pool.
    #[must_use]
    pub fn keep_alive(&self) -> KeepAlive {
        keep_alive(&self.inner)
    }

    /// Number of work items queued but not yet started.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.pending.load(Ordering::Acquire)
    }

    /// Number of work items that have finished running.
    #[must_use]
    pub fn completed(&self) -> u64 {
        self.inner.completed.load(Ordering::Acquire)
    }

    /// Number of worker threads the pool was started with.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Returns `true` once shutdown has been requested.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }

    /// Stops accepting work. Queued work still runs.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        self.inner.notify_all();
    }

    /// Shuts down, drains queued work and waits for every worker to exit.
    pub fn join(&self) {
        self.shutdown();
        let handles = std::mem::take(&mut *self.workers.lock());
        let current = thread::current().id();
        for handle in handles {
            if handle.thread().id() == current {
                continue;
            }
            let _ = handle.join();
        }

        // Anything pushed between a worker's last check and its exit.
        self.inner.drain_stranded();
        debug!("thread pool stopped");
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.join();
    }
}

impl fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadPool")
            .field("workers", &self.worker_count)
            .field("pending", &self.pending())
            .field("completed", &self.completed())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

#[cfg_attr(not(feature = "tracing-integration"), allow(unused_variables))]
fn worker_loop(inner: &PoolInner) {
    loop {
        if let Some(work) = inner.queue.pop() {
            inner.pending.fetch_sub(1, Ordering::AcqRel);
            if let Err(payload) =
                std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| work.run()))
            {
                let payload = PanicPayload::from_panic(payload.as_ref());
                error!(panic = %payload, "work panicked on thread pool");
            }
            inner.completed.fetch_add(1, Ordering::AcqRel);
            continue;
        }

        if inner.shutdown.load(Ordering::Acquire) {
            break;
        }

        let mut guard = inner.mutex.lock();
        if inner.queue.is_empty() && !inner.shutdown.load(Ordering::Acquire) {
            inner.condvar.wait(&mut guard);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{init_test_logging, DropCounter};
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn runs_work_on_named_workers() {
        init_test_logging();
        let pool = ThreadPool::with_config(
            PoolConfig::default()
                .worker_threads(2)
                .thread_name_prefix("pool-test"),
        )
        .expect("pool");
        let (tx, rx) = mpsc::channel();

        pool.keep_alive().add(Work::new(move || {
            let name = thread::current().name().map(str::to_owned);
            tx.send(name).expect("receiver alive");
        }));

        let name = rx
            .recv_timeout(Duration::from_secs(5))
            .expect("work ran")
            .expect("worker is named");
        assert!(name.starts_with("pool-test-"), "unexpected name {name}");
    }

    #[test]
    fn join_drains_queued_work() {
        init_test_logging();
        let pool = ThreadPool::new(1).expect("pool");
        let handle = pool.keep_alive();
        let count = Arc::new(AtomicUsize::new(0));

        for _ in 0..32 {
            let count = Arc::clone(&count);
            handle.add(Work::new(move || {
                count.fetch_add(1, Ordering::SeqCst);
            }));
        }
        pool.join();

        assert_eq!(count.load(Ordering::SeqCst), 32);
        assert_eq!(pool.completed(), 32);
        assert_eq!(pool.pending(), 0);
    }

    #[test]
    fn work_after_shutdown_is_dropped() {
        init_test_logging();
        let pool = ThreadPool::new(1).expect("pool");
        let handle = pool.keep_alive();
        pool.join();
        assert!(pool.is_shutdown());

        let (tracked, drops) = DropCounter::new();
        handle.add(Work::new(move || drop(tracked)));
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        assert_eq!(pool.completed(), 0);
    }

    #[test]
    fn panicking_work_does_not_kill_worker() {
        init_test_logging();
        let pool = ThreadPool::new(1).expect("pool");
        let handle = pool.keep_alive();
        let (tx, rx) = mpsc::channel();

        handle.add(Work::new(|| panic!("work exploded")));
        handle.add(Work::new(move || tx.send(()).expect("receiver alive")));

        rx.recv_timeout(Duration::from_secs(5))
            .expect("worker survived the panic");
        pool.join();
        assert_eq!(pool.completed(), 2);
    }

    #[test]
    fn work_queued_after_workers_exit_is_dropped() {
        init_test_logging();
        let pool = ThreadPool::new(2).expect("pool");
        pool.join();
        assert_eq!(pool.inner.live_workers.load(Ordering::SeqCst), 0);

        // Work that passed the shutdown check just before the pool stopped.
        let (tracked, drops) = DropCounter::new();
        pool.inner.enqueue(Work::new(move || drop(tracked)));

        assert_eq!(drops.load(Ordering::SeqCst), 1);
        assert_eq!(pool.pending(), 0);
        assert!(pool.inner.queue.is_empty());
    }

    #[test]
    fn concurrent_adds_during_join_never_strand_work() {
        init_test_logging();
        let pool = Arc::new(ThreadPool::new(2).expect("pool"));
        let ran = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel();

        let submitters: Vec<_> = (0..4)
            .map(|_| {
                let handle = pool.keep_alive();
                let ran = Arc::clone(&ran);
                let tx = tx.clone();
                thread::spawn(move || {
                    for _ in 0..200 {
                        let (tracked, drops) = DropCounter::new();
                        let ran = Arc::clone(&ran);
                        handle.add(Work::new(move || {
                            ran.fetch_add(1, Ordering::SeqCst);
                            drop(tracked);
                        }));
                        tx.send(drops).expect("receiver alive");
                    }
                })
            })
            .collect();
        drop(tx);

        pool.join();
        for submitter in submitters {
            submitter.join().expect("submitter");
        }

        // Every item either ran or was released; none is left in the queue.
        let released: Vec<_> = rx.iter().collect();
        assert_eq!(released.len(), 800);
        assert!(released.iter().all(|d| d.load(Ordering::SeqCst) == 1));
        assert!(pool.inner.queue.is_empty());
        assert_eq!(pool.pending(), 0);
        assert!(ran.load(Ordering::SeqCst) <= 800);
    }

    #[test]
    fn zero_workers_is_rejected() {
        assert_eq!(ThreadPool::new(0).unwrap_err(), ConfigError::ZeroWorkers);
    }
}
