//! Deferred eventuals.
//!
//! A [`SemiEventual`] chain shares one [`DeferredExecutor`]. Each link's work
//! is attached to that cell when its input arrives. The first attach parks
//! until [`SemiEventual::via`] binds an executor; once the cell is running,
//! later links run inline behind the first.
//!
//! Before binding, links only hold a weak reference to the cell, so dropping
//! an unbound chain destroys the cell and fails the pending links with
//! [`BrokenPromise`](crate::Error::BrokenPromise). Binding upgrades the
//! chain's anchor to a strong token for the rest of the chain's life.

use super::{run_continuation, Eventual, Promise};
use crate::error::{Error, Try};
use crate::executor::deferred::{DeferredExecutor, DeferredKeepAlive, WeakDeferred};
use crate::executor::{InlineExecutor, KeepAlive, Work};
use crate::resolve::{Continuation, Lift};
use crate::tracing_compat::trace;
use std::fmt;
use std::sync::{Arc, OnceLock};

struct Anchor {
    cell: WeakDeferred,
    bound: OnceLock<DeferredKeepAlive>,
}

impl Anchor {
    fn token(&self) -> Option<DeferredKeepAlive> {
        self.bound
            .get()
            .map(DeferredKeepAlive::acquire)
            .or_else(|| self.cell.upgrade())
    }
}

struct Chain {
    cell: DeferredKeepAlive,
    anchor: Arc<Anchor>,
}

impl Chain {
    fn new() -> Self {
        let cell = DeferredExecutor::create();
        let anchor = Arc::new(Anchor {
            cell: cell.downgrade(),
            bound: OnceLock::new(),
        });
        Self { cell, anchor }
    }
}

/// An eventual whose continuations wait for an executor to be bound.
pub struct SemiEventual<T> {
    inner: Eventual<T>,
    chain: Option<Chain>,
}

impl<T> SemiEventual<T> {
    pub(super) const fn from_eventual(inner: Eventual<T>) -> Self {
        Self { inner, chain: None }
    }

    /// A deferred eventual that already holds `value`.
    #[must_use]
    pub fn ready(value: T) -> Self {
        Self::from_eventual(Eventual::ready(value))
    }

    /// A deferred eventual that already failed with `error`.
    #[must_use]
    pub fn failed(error: Error) -> Self {
        Self::from_eventual(Eventual::failed(error))
    }

    /// Returns true if the last link's result has arrived.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.inner.is_ready()
    }

    /// The deferred executor shared by this chain, once a link was deferred.
    #[must_use]
    pub fn deferred(&self) -> Option<&DeferredKeepAlive> {
        self.chain.as_ref().map(|chain| &chain.cell)
    }
}

impl<T: Send + 'static> SemiEventual<T> {
    /// Composes a continuation that runs on the executor bound later.
    ///
    /// Resolution and flattening follow [`Eventual::then`].
    pub fn defer<F, M>(self, f: F) -> SemiEventual<<F::Output as Lift>::Inner>
    where
        F: Continuation<T, M>,
        F::Output: Lift,
    {
        let chain = self.chain.unwrap_or_else(Chain::new);
        let anchor = Arc::clone(&chain.anchor);
        let (promise, out) = Promise::new();

        self.inner.subscribe(Box::new(move |input| {
            let work = Work::new(move || run_continuation::<T, M, F>(f, input, promise));
            match anchor.token() {
                Some(cell) => cell.attach_work(work),
                None => {
                    trace!("deferred chain dropped before binding, discarding link");
                    drop(work);
                }
            }
        }));

        SemiEventual {
            inner: out,
            chain: Some(chain),
        }
    }

    /// Binds `executor`, releasing any parked work onto it.
    pub fn via(self, executor: KeepAlive) -> Eventual<T> {
        let Self { inner, chain } = self;
        if let Some(chain) = chain {
            let _ = chain.anchor.bound.set(chain.cell.acquire());
            chain.cell.attach_executor(executor.clone());
        }
        inner.via(executor)
    }

    /// Drives the chain on the calling thread and blocks for the result.
    pub fn wait(self) -> Try<T> {
        self.via(InlineExecutor::keep_alive()).wait()
    }
}

impl<T> fmt::Debug for SemiEventual<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SemiEventual")
            .field("ready", &self.is_ready())
            .field("deferred", &self.deferred())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::deferred::DeferredState;
    use crate::executor::{keep_alive, ManualExecutor};
    use crate::test_utils::{init_test_logging, DropCounter};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::thread;

    #[test]
    fn deferred_work_waits_for_via() {
        init_test_logging();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let semi = SemiEventual::ready(4_u32).defer(move |v: u32| {
            seen.fetch_add(1, Ordering::SeqCst);
            v * 2
        });

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            semi.deferred().map(|cell| cell.state()),
            Some(DeferredState::HasWork)
        );

        let manual = Arc::new(ManualExecutor::new());
        let out = semi.via(keep_alive(&manual));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(manual.run_all(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(out.wait(), Ok(8));
    }

    #[test]
    fn later_links_run_inline_behind_the_first() {
        init_test_logging();
        let manual = Arc::new(ManualExecutor::new());
        let order = Arc::new(Mutex::new(Vec::new()));
        let (first, second, third) = (
            Arc::clone(&order),
            Arc::clone(&order),
            Arc::clone(&order),
        );

        let out = SemiEventual::ready(1_u8)
            .defer(move |v: u8| {
                first.lock().expect("order").push("first");
                v + 1
            })
            .defer(move |v: &mut u8| {
                second.lock().expect("order").push("second");
                *v + 1
            })
            .defer(move |r: Try<u8>| {
                third.lock().expect("order").push("third");
                r.map(|v| v * 10)
            })
            .via(keep_alive(&manual));

        assert_eq!(manual.run_all(), 1, "one submission for the whole chain");
        assert_eq!(manual.submitted(), 1);
        assert_eq!(*order.lock().expect("order"), ["first", "second", "third"]);
        assert_eq!(out.wait(), Ok(Ok(30)));
    }

    #[test]
    fn executor_bound_before_input_arrives() {
        let (promise, eventual) = Promise::new();
        let manual = Arc::new(ManualExecutor::new());
        let out = eventual
            .semi()
            .defer(|v: String| v.to_uppercase())
            .via(keep_alive(&manual));

        assert_eq!(manual.pending(), 0);
        promise.set_value("late".to_string());
        assert_eq!(manual.run_all(), 1);
        assert_eq!(out.wait(), Ok("LATE".to_string()));
    }

    #[test]
    fn wait_drives_chain_inline() {
        let out = SemiEventual::ready(6_i64)
            .defer(|v: i64| v - 1)
            .defer(|v: i64| Eventual::ready(v * v))
            .wait();
        assert_eq!(out, Ok(25));
    }

    #[test]
    fn wait_across_threads() {
        let (promise, eventual) = Promise::new();
        let semi = eventual.semi().defer(|v: u16| u32::from(v) + 1);
        let producer = thread::spawn(move || promise.set_value(41_u16));
        assert_eq!(semi.wait(), Ok(42));
        producer.join().expect("producer");
    }

    #[test]
    fn dropping_unbound_chain_releases_everything() {
        let (tracked, drops) = DropCounter::new();
        let semi = SemiEventual::ready(0_u8).defer(move |v: u8| {
            let _keep = &tracked;
            v
        });
        let cell = semi.deferred().map(DeferredKeepAlive::downgrade);

        drop(semi);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        assert!(cell.and_then(|weak| weak.upgrade()).is_none());
    }

    #[test]
    fn input_after_chain_dropped_is_discarded() {
        let (promise, eventual) = Promise::<u8>::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let semi = eventual.semi().defer(move || {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        drop(semi);
        promise.set_value(1);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn semi_eventual_return_is_flattened() {
        let out = Eventual::ready(3_u32)
            .then(|v: u32| SemiEventual::ready(v).defer(|v: u32| v + 4))
            .wait();
        assert_eq!(out, Ok(7));
    }
}
