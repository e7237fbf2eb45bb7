//! Deferred work cell: holds one unit of work until an executor is bound.
//!
//! A [`DeferredExecutor`] reconciles two arrivals that may happen in either
//! order and on different threads: the work to run, and the executor to run it
//! on. Whichever arrives second submits the work.
//!
//! # State Machine
//!
//! ```text
//!            attach_work                 attach_executor
//!   New ───────────────────► HasWork ───────────────────┐
//!    │                                                  ▼
//!    │ attach_executor                              Running ◄─┐
//!    └────────────────────► HasExecutor ────────────────┘     │ attach_work
//!                                       attach_work           │ (runs inline)
//!                                                             └──
//! ```
//!
//! Leaving `New` is a single compare-and-swap. If `attach_work` and
//! `attach_executor` race, exactly one wins the swap and parks its half in the
//! cell; the loser observes the winner's state and performs the submission.
//! Neither path blocks.
//!
//! Once `Running`, further work is invoked synchronously on the caller. Work
//! attached while the cell is running comes from code that is itself executing
//! on the bound executor, and re-submitting it could deadlock a single-threaded
//! executor.
//!
//! # Lifetime
//!
//! The cell has no single owner. It lives inside an `Arc` and every party that
//! may still touch it holds a [`DeferredKeepAlive`] token: cloning a token is
//! `acquire`, dropping it is `release`, and the last release destroys the cell
//! together with any work that never ran. [`DeferredExecutor::create`] is the
//! only constructor and returns the first token, so a cell never exists
//! without one.
//!
//! # Contract Violations
//!
//! Attaching a second work item while one is pending, or binding a second
//! executor, panics. Either would break the exactly-once guarantee the cell
//! exists to provide.

use super::{Executor, KeepAlive, Work};
use crate::tracing_compat::{debug, error, trace};
use crossbeam_utils::atomic::AtomicCell;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock, Weak};

const NEW: u8 = 0;
const HAS_EXECUTOR: u8 = 1;
const HAS_WORK: u8 = 2;
const RUNNING: u8 = 3;

/// Observable state of a [`DeferredExecutor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeferredState {
    /// Neither work nor executor attached.
    New,
    /// An executor is attached; waiting for work.
    HasExecutor,
    /// Work is attached; waiting for an executor.
    HasWork,
    /// Work has been submitted. Terminal.
    Running,
}

impl DeferredState {
    const fn from_raw(raw: u8) -> Self {
        match raw {
            NEW => Self::New,
            HAS_EXECUTOR => Self::HasExecutor,
            HAS_WORK => Self::HasWork,
            _ => Self::Running,
        }
    }

    /// Returns true once work has been handed to the executor.
    #[must_use]
    pub const fn is_running(self) -> bool {
        matches!(self, Self::Running)
    }
}

/// The deferred work cell.
///
/// Obtain one through [`DeferredExecutor::create`]; all access goes through
/// the returned [`DeferredKeepAlive`].
pub struct DeferredExecutor {
    state: AtomicU8,
    /// Written once before the `New -> HasWork` swap, taken once at submission.
    work: AtomicCell<Option<Box<Work>>>,
    /// Written once before the `New -> HasExecutor` swap; kept until drop.
    executor: OnceLock<KeepAlive>,
}

impl DeferredExecutor {
    /// Creates a cell in state [`DeferredState::New`] and returns its first
    /// keep-alive token.
    #[must_use]
    pub fn create() -> DeferredKeepAlive {
        let inner = Arc::new(Self {
            state: AtomicU8::new(NEW),
            work: AtomicCell::new(None),
            executor: OnceLock::new(),
        });
        trace!("deferred executor created");
        DeferredKeepAlive { inner }
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> DeferredState {
        DeferredState::from_raw(self.state.load(Ordering::Acquire))
    }

    /// Returns the bound executor, if any.
    #[must_use]
    pub fn executor(&self) -> Option<&KeepAlive> {
        self.executor.get()
    }

    /// Attaches the work item.
    ///
    /// - `New`: the work is stored until an executor arrives.
    /// - `HasExecutor`: the work is submitted to the bound executor.
    /// - `Running`: the work runs on the calling thread before this returns.
    ///
    /// Must not be called concurrently with another `attach_work` on the same
    /// cell. Racing a single `attach_executor` is supported.
    ///
    /// # Panics
    ///
    /// Panics if earlier work is still pending.
    pub fn attach_work(&self, work: Work) {
        match self.state() {
            DeferredState::Running => {
                trace!("deferred executor running, invoking work inline");
                work.run();
                return;
            }
            DeferredState::HasWork => {
                contract_violation("work attached while earlier work is still pending")
            }
            DeferredState::New | DeferredState::HasExecutor => {}
        }

        if self.work.swap(Some(Box::new(work))).is_some() {
            contract_violation("work attached while earlier work is still pending");
        }

        match self
            .state
            .compare_exchange(NEW, HAS_WORK, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                trace!(state = ?DeferredState::HasWork, "deferred executor transition");
            }
            Err(HAS_EXECUTOR) => self.submit_pending(),
            Err(raw) => contract_violation_in("attach_work", raw),
        }
    }

    /// Binds the executor that pending or future work runs on.
    ///
    /// If work is already pending it is submitted before this returns.
    ///
    /// # Panics
    ///
    /// Panics if an executor was bound before.
    pub fn attach_executor(&self, executor: KeepAlive) {
        if self.executor.set(executor).is_err() {
            contract_violation("executor attached twice");
        }

        match self
            .state
            .compare_exchange(NEW, HAS_EXECUTOR, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                trace!(state = ?DeferredState::HasExecutor, "deferred executor transition");
            }
            Err(HAS_WORK) => self.submit_pending(),
            Err(raw) => contract_violation_in("attach_executor", raw),
        }
    }

    /// Wraps `func` so that `keep_alive` stays held until `func` returns.
    ///
    /// The cell uses this when submitting, so an executor cannot be torn down
    /// while the work it is running is still on the stack.
    pub fn wrap<F>(keep_alive: KeepAlive, func: F) -> DeferredWork<F> {
        DeferredWork { keep_alive, func }
    }

    /// Hands the pending work to the bound executor. Called by whichever of
    /// the two attach paths supplied the second half.
    fn submit_pending(&self) {
        let Some(work) = self.work.take() else {
            contract_violation("submission with no pending work")
        };
        let Some(executor) = self.executor.get() else {
            contract_violation("submission with no executor")
        };

        self.state.store(RUNNING, Ordering::Release);
        debug!(state = ?DeferredState::Running, "deferred executor submitting work");
        executor.add(Self::wrap(executor.clone(), move || (*work).run()).into_work());
    }
}

impl Executor for DeferredExecutor {
    fn add(&self, work: Work) {
        self.attach_work(work);
    }
}

impl fmt::Debug for DeferredExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredExecutor")
            .field("state", &self.state())
            .field("has_executor", &self.executor.get().is_some())
            .finish_non_exhaustive()
    }
}

impl Drop for DeferredExecutor {
    #[cfg_attr(not(feature = "tracing-integration"), allow(unused_variables))]
    fn drop(&mut self) {
        let state = DeferredState::from_raw(*self.state.get_mut());
        let dropped_work = self.work.take().is_some();
        debug!(state = ?state, dropped_work, "deferred executor released");
    }
}

/// Keep-alive token for a [`DeferredExecutor`].
///
/// `Clone` acquires a token and `Drop` releases one; [`acquire`](Self::acquire)
/// and [`release`](Self::release) spell the same operations out. Hold a token
/// for the whole duration of any call into the cell.
#[derive(Clone)]
pub struct DeferredKeepAlive {
    inner: Arc<DeferredExecutor>,
}

impl DeferredKeepAlive {
    /// Acquires another token for the same cell.
    #[must_use]
    pub fn acquire(&self) -> Self {
        self.clone()
    }

    /// Releases this token. The cell is destroyed if it was the last one.
    pub fn release(self) {
        drop(self);
    }

    /// Number of outstanding tokens, including executor handles created by
    /// [`as_executor`](Self::as_executor).
    #[must_use]
    pub fn keep_alive_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Returns a generic executor handle to the cell. The handle counts as a
    /// token.
    #[must_use]
    pub fn as_executor(&self) -> KeepAlive {
        KeepAlive::new(Arc::clone(&self.inner))
    }

    /// Returns true if both tokens refer to the same cell.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn downgrade(&self) -> WeakDeferred {
        WeakDeferred(Arc::downgrade(&self.inner))
    }
}

impl Deref for DeferredKeepAlive {
    type Target = DeferredExecutor;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl fmt::Debug for DeferredKeepAlive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredKeepAlive")
            .field("state", &self.state())
            .field("tokens", &self.keep_alive_count())
            .finish()
    }
}

/// Non-owning reference to a cell; does not count as a token.
#[derive(Clone)]
pub(crate) struct WeakDeferred(Weak<DeferredExecutor>);

impl WeakDeferred {
    /// Acquires a token if the cell still exists.
    pub(crate) fn upgrade(&self) -> Option<DeferredKeepAlive> {
        self.0.upgrade().map(|inner| DeferredKeepAlive { inner })
    }
}

/// A closure bundled with the keep-alive handle it must hold while running.
///
/// Built by [`DeferredExecutor::wrap`].
pub struct DeferredWork<F> {
    keep_alive: KeepAlive,
    func: F,
}

impl<F> DeferredWork<F> {
    /// Invokes the closure, releasing the handle only after it returns.
    pub fn call<R>(self) -> R
    where
        F: FnOnce() -> R,
    {
        let Self { keep_alive, func } = self;
        let out = func();
        drop(keep_alive);
        out
    }

    /// The handle held for the duration of the call.
    #[must_use]
    pub fn keep_alive(&self) -> &KeepAlive {
        &self.keep_alive
    }
}

impl<F> DeferredWork<F>
where
    F: FnOnce() + Send + 'static,
{
    /// Converts into a zero-argument work item.
    pub fn into_work(self) -> Work {
        Work::new(move || self.call())
    }
}

impl<F> fmt::Debug for DeferredWork<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredWork")
            .field("keep_alive", &self.keep_alive)
            .finish_non_exhaustive()
    }
}

#[cold]
#[track_caller]
fn contract_violation(what: &str) -> ! {
    error!(violation = what, "deferred executor contract violation");
    panic!("deferred executor contract violation: {what}");
}

#[cold]
#[track_caller]
fn contract_violation_in(op: &str, raw: u8) -> ! {
    let state = DeferredState::from_raw(raw);
    error!(op, state = ?state, "deferred executor contract violation");
    panic!("deferred executor contract violation: {op} observed state {state:?}");
}
