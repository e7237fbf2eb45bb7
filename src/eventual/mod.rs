//! A minimal promise/eventual pair for composing continuations onto.
//!
//! [`Promise::new`] returns a write side and an [`Eventual`] read side. A
//! continuation composed with [`Eventual::then`] runs once the value arrives,
//! on the executor the eventual was bound to with [`Eventual::via`] (or inline
//! on the fulfilling thread when unbound). Its result is lifted through
//! [`Lift`], so returning another eventual flattens one level.
//!
//! [`SemiEventual`] is the deferred flavour: continuations composed with
//! [`SemiEventual::defer`] are parked on a [`DeferredExecutor`] and run on
//! whichever executor the consumer later binds with [`SemiEventual::via`].
//!
//! [`DeferredExecutor`]: crate::executor::deferred::DeferredExecutor

mod semi;

pub use semi::SemiEventual;

use crate::error::{Error, Try};
use crate::executor::{KeepAlive, Work};
use crate::resolve::{self, form, Continuation, Lift};
use crate::tracing_compat::trace;
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;

type Callback<T> = Box<dyn FnOnce(Try<T>) + Send>;

enum Slot<T> {
    Empty,
    Waiting(Callback<T>),
    Done(Try<T>),
    Taken,
}

/// Shared state between a promise and its eventual.
///
/// Exactly one result is stored and exactly one consumer takes it: either a
/// callback registered by `subscribe` or a blocked `wait`.
struct Core<T> {
    slot: Mutex<Slot<T>>,
    ready: Condvar,
}

impl<T> Core<T> {
    fn new(slot: Slot<T>) -> Arc<Self> {
        Arc::new(Self {
            slot: Mutex::new(slot),
            ready: Condvar::new(),
        })
    }

    fn fulfil(&self, result: Try<T>) {
        let mut slot = self.slot.lock();
        match std::mem::replace(&mut *slot, Slot::Taken) {
            Slot::Empty => {
                *slot = Slot::Done(result);
                drop(slot);
                self.ready.notify_all();
            }
            Slot::Waiting(callback) => {
                drop(slot);
                callback(result);
            }
            Slot::Done(_) | Slot::Taken => unreachable!("promise fulfilled twice"),
        }
    }

    fn subscribe(&self, callback: Callback<T>) {
        let mut slot = self.slot.lock();
        match std::mem::replace(&mut *slot, Slot::Taken) {
            Slot::Empty => *slot = Slot::Waiting(callback),
            Slot::Done(result) => {
                drop(slot);
                callback(result);
            }
            Slot::Waiting(_) | Slot::Taken => unreachable!("eventual consumed twice"),
        }
    }

    fn wait(&self) -> Try<T> {
        let mut slot = self.slot.lock();
        loop {
            match std::mem::replace(&mut *slot, Slot::Taken) {
                Slot::Done(result) => return result,
                Slot::Empty => {
                    *slot = Slot::Empty;
                    self.ready.wait(&mut slot);
                }
                Slot::Waiting(_) | Slot::Taken => unreachable!("eventual consumed twice"),
            }
        }
    }

    fn is_ready(&self) -> bool {
        matches!(*self.slot.lock(), Slot::Done(_))
    }
}

/// Write side of an [`Eventual`].
///
/// Dropping a promise without fulfilling it fails the eventual with
/// [`Error::BrokenPromise`].
pub struct Promise<T> {
    core: Option<Arc<Core<T>>>,
}

impl<T> Promise<T> {
    /// Creates a connected promise and eventual.
    #[allow(clippy::new_ret_no_self)]
    #[must_use]
    pub fn new() -> (Self, Eventual<T>) {
        let core = Core::new(Slot::Empty);
        (
            Self {
                core: Some(Arc::clone(&core)),
            },
            Eventual {
                core,
                executor: None,
            },
        )
    }

    /// Fulfils with a wrapped result.
    pub fn set_try(mut self, result: Try<T>) {
        if let Some(core) = self.core.take() {
            core.fulfil(result);
        }
    }

    /// Fulfils with a value.
    pub fn set_value(self, value: T) {
        self.set_try(Ok(value));
    }

    /// Fails with `error`.
    pub fn set_error(self, error: Error) {
        self.set_try(Err(error));
    }
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        if let Some(core) = self.core.take() {
            trace!("promise dropped unfulfilled");
            core.fulfil(Err(Error::BrokenPromise));
        }
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("fulfilled", &self.core.is_none())
            .finish()
    }
}

/// Read side of a [`Promise`].
///
/// Consumed by composing a continuation onto it or by waiting on it.
pub struct Eventual<T> {
    core: Arc<Core<T>>,
    executor: Option<KeepAlive>,
}

impl<T> Eventual<T> {
    /// An eventual that already holds `value`.
    #[must_use]
    pub fn ready(value: T) -> Self {
        Self::from_try(Ok(value))
    }

    /// An eventual that already failed with `error`.
    #[must_use]
    pub fn failed(error: Error) -> Self {
        Self::from_try(Err(error))
    }

    /// An eventual that already holds `result`.
    #[must_use]
    pub fn from_try(result: Try<T>) -> Self {
        Self {
            core: Core::new(Slot::Done(result)),
            executor: None,
        }
    }

    /// Returns true if the result has arrived.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.core.is_ready()
    }

    /// The executor continuations will run on, if bound.
    #[must_use]
    pub const fn executor(&self) -> Option<&KeepAlive> {
        self.executor.as_ref()
    }

    /// Binds the executor subsequent continuations run on.
    #[must_use]
    pub fn via(mut self, executor: KeepAlive) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Blocks the calling thread until the result arrives.
    pub fn wait(self) -> Try<T> {
        self.core.wait()
    }
}

impl<T: Send + 'static> Eventual<T> {
    /// Composes a continuation.
    ///
    /// The calling form of `f` is resolved from its parameter list (see
    /// [`resolve`]). Value forms are skipped when this eventual fails; the
    /// failure propagates. A panic in `f` fails the result with
    /// [`Error::Panicked`].
    pub fn then<F, M>(self, f: F) -> resolve::Composed<F, T, M>
    where
        F: Continuation<T, M>,
        F::Output: Lift,
    {
        let (promise, out) = Promise::new();
        let executor = self.executor.clone();
        let dispatch = executor.clone();
        self.core.subscribe(Box::new(move |input| {
            let work = Work::new(move || run_continuation::<T, M, F>(f, input, promise));
            match dispatch {
                Some(executor) => executor.add(work),
                None => work.run(),
            }
        }));
        Eventual {
            core: out.core,
            executor,
        }
    }

    /// Composes a continuation that takes the value.
    pub fn then_value<F, R>(self, f: F) -> Eventual<R::Inner>
    where
        F: FnOnce(T) -> R + Send + 'static,
        R: Lift,
    {
        self.then::<F, form::Value>(f)
    }

    /// Composes a continuation that takes the wrapped result.
    pub fn then_try<F, R>(self, f: F) -> Eventual<R::Inner>
    where
        F: FnOnce(Try<T>) -> R + Send + 'static,
        R: Lift,
    {
        self.then::<F, form::Try>(f)
    }

    /// Drops the executor binding, producing a deferred eventual.
    #[must_use]
    pub fn semi(self) -> SemiEventual<T> {
        SemiEventual::from_eventual(Self {
            core: self.core,
            executor: None,
        })
    }

    /// Fulfils `promise` with this eventual's result once it arrives.
    pub(crate) fn forward_to(self, promise: Promise<T>) {
        self.core.subscribe(Box::new(move |result| promise.set_try(result)));
    }

    pub(crate) fn subscribe(self, callback: Callback<T>) {
        self.core.subscribe(callback);
    }
}

impl<T> fmt::Debug for Eventual<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Eventual")
            .field("ready", &self.is_ready())
            .field("bound", &self.executor.is_some())
            .finish()
    }
}

/// Runs `f` on `input` and forwards its lifted result into `promise`.
pub(crate) fn run_continuation<T, M, F>(
    f: F,
    input: Try<T>,
    promise: Promise<<F::Output as Lift>::Inner>,
) where
    F: Continuation<T, M>,
    F::Output: Lift,
{
    match resolve::invoke::<T, M, F>(f, input) {
        Ok(output) => output.lift().forward_to(promise),
        Err(error) => promise.set_error(error),
    }
}
