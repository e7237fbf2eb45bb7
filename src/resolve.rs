//! Continuation-signature resolution.
//!
//! When a continuation is composed onto an [`Eventual<T>`], the library has
//! to decide two things without any annotation from the caller:
//!
//! 1. **How to call it.** A continuation may take nothing, the value, a
//!    mutable borrow of the value, the wrapped [`Try<T>`], or a mutable borrow
//!    of the wrapped result. The forms are ranked in exactly that order
//!    ([`CallForm`]'s `Ord`).
//! 2. **What the composition yields.** If the continuation returns an
//!    [`Eventual<U>`] or [`SemiEventual<U>`], the result is flattened one level
//!    to `Eventual<U>`; any other return type `R` yields `Eventual<R>`.
//!
//! Both decisions are made by trait resolution. Each calling form is one
//! implementation of [`Continuation<T, M>`], distinguished by the marker type
//! `M` from [`form`]. A concrete closure or function implements `FnOnce` for
//! exactly one argument list, so at most one form ever applies and the
//! compiler infers `M`. A callable that fits no form (for example one taking
//! two arguments) is rejected at compile time:
//!
//! ```compile_fail
//! use deferral::resolve;
//!
//! let sig = resolve::signature_of::<i32, _, _>(&|a: i32, b: i32| a + b);
//! ```
//!
//! Closure parameters must carry type annotations (or be absent): inference
//! cannot see through the form selection to the closure's argument types.
//!
//! ```
//! use deferral::resolve::{self, CallForm};
//! use deferral::Try;
//!
//! let discard = resolve::signature_of::<i32, _, _>(&|| "done");
//! assert_eq!(discard.form, CallForm::Discard);
//!
//! let observe = resolve::signature_of::<String, _, _>(&|r: &mut Try<String>| r.is_ok());
//! assert_eq!(observe.form, CallForm::TryRef);
//! ```
//!
//! [`Extract`] covers the other direction: reading the declared parameters
//! and return type off a closure or function's call signature, with no value
//! type to test against.
//!
//! When the input is a bare `Err(..)` the value type is not pinned, and a
//! wrapped-result continuation would fit two forms. Name `T` explicitly in
//! that case, as in `invoke::<i32, _, _>(..)`.

use crate::error::{Error, PanicPayload, Try};
use crate::eventual::{Eventual, SemiEventual};
use crate::executor::InlineExecutor;
use crate::tracing_compat::debug;
use std::any::type_name;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// The calling convention a continuation was resolved to.
///
/// Variants are declared in resolution priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CallForm {
    /// Called with no arguments; the input value is discarded.
    Discard,
    /// Called with the value, moved.
    Value,
    /// Called with `&mut` the value.
    ValueRef,
    /// Called with the wrapped result, moved.
    Try,
    /// Called with `&mut` the wrapped result.
    TryRef,
}

impl CallForm {
    /// All forms, highest priority first.
    pub const RESOLUTION_ORDER: [Self; 5] = [
        Self::Discard,
        Self::Value,
        Self::ValueRef,
        Self::Try,
        Self::TryRef,
    ];

    /// Returns true if the continuation sees failures. Value forms are
    /// skipped when the input failed and the failure propagates instead.
    #[must_use]
    pub const fn observes_failure(self) -> bool {
        matches!(self, Self::Try | Self::TryRef)
    }
}

/// Marker types selecting a [`Continuation`] implementation.
pub mod form {
    /// Marker for [`CallForm::Discard`](super::CallForm::Discard).
    #[derive(Debug)]
    pub enum Discard {}
    /// Marker for [`CallForm::Value`](super::CallForm::Value).
    #[derive(Debug)]
    pub enum Value {}
    /// Marker for [`CallForm::ValueRef`](super::CallForm::ValueRef).
    #[derive(Debug)]
    pub enum ValueRef {}
    /// Marker for [`CallForm::Try`](super::CallForm::Try).
    #[derive(Debug)]
    pub enum Try {}
    /// Marker for [`CallForm::TryRef`](super::CallForm::TryRef).
    #[derive(Debug)]
    pub enum TryRef {}
}

/// A callable that can continue a computation producing `T`.
///
/// `M` is one of the [`form`] markers and is inferred.
pub trait Continuation<T, M>: Send + 'static {
    /// The callable's raw return type.
    type Output;

    /// The form this implementation calls with.
    const FORM: CallForm;

    /// Calls the continuation in its resolved form.
    ///
    /// Value forms short-circuit on a failed input.
    fn call_with(self, input: Try<T>) -> Try<Self::Output>;
}

impl<F, T, R> Continuation<T, form::Discard> for F
where
    F: FnOnce() -> R + Send + 'static,
{
    type Output = R;
    const FORM: CallForm = CallForm::Discard;

    fn call_with(self, input: Try<T>) -> Try<R> {
        input.map(|_| self())
    }
}

impl<F, T, R> Continuation<T, form::Value> for F
where
    F: FnOnce(T) -> R + Send + 'static,
{
    type Output = R;
    const FORM: CallForm = CallForm::Value;

    fn call_with(self, input: Try<T>) -> Try<R> {
        input.map(self)
    }
}

impl<F, T, R> Continuation<T, form::ValueRef> for F
where
    F: FnOnce(&mut T) -> R + Send + 'static,
{
    type Output = R;
    const FORM: CallForm = CallForm::ValueRef;

    fn call_with(self, input: Try<T>) -> Try<R> {
        let mut value = input?;
        Ok(self(&mut value))
    }
}

impl<F, T, R> Continuation<T, form::Try> for F
where
    F: FnOnce(Try<T>) -> R + Send + 'static,
{
    type Output = R;
    const FORM: CallForm = CallForm::Try;

    fn call_with(self, input: Try<T>) -> Try<R> {
        Ok(self(input))
    }
}

impl<F, T, R> Continuation<T, form::TryRef> for F
where
    F: FnOnce(&mut Try<T>) -> R + Send + 'static,
{
    type Output = R;
    const FORM: CallForm = CallForm::TryRef;

    fn call_with(self, mut input: Try<T>) -> Try<R> {
        Ok(self(&mut input))
    }
}

/// Return types a continuation may produce, and how they flatten.
///
/// Implemented for [`Eventual`] and [`SemiEventual`] (flattened) and for
/// common value types (wrapped). Implement it for your own value types with
/// [`lift_value!`](crate::lift_value).
pub trait Lift: Send + 'static {
    /// True if this type is itself an asynchronous result.
    const IS_EVENTUAL: bool;

    /// The value the composed [`Eventual`] carries.
    type Inner: Send + 'static;

    /// Converts into the composed eventual.
    fn lift(self) -> Eventual<Self::Inner>;
}

impl<T: Send + 'static> Lift for Eventual<T> {
    const IS_EVENTUAL: bool = true;
    type Inner = T;

    fn lift(self) -> Eventual<T> {
        self
    }
}

impl<T: Send + 'static> Lift for SemiEventual<T> {
    const IS_EVENTUAL: bool = true;
    type Inner = T;

    fn lift(self) -> Eventual<T> {
        self.via(InlineExecutor::keep_alive())
    }
}

/// Implements [`Lift`] for plain value types: the composed eventual simply
/// carries the value.
///
/// ```
/// struct Row(u64);
/// deferral::lift_value!(Row);
/// ```
#[macro_export]
macro_rules! lift_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl $crate::resolve::Lift for $ty {
                const IS_EVENTUAL: bool = false;
                type Inner = Self;

                fn lift(self) -> $crate::eventual::Eventual<Self> {
                    $crate::eventual::Eventual::ready(self)
                }
            }
        )*
    };
}

lift_value!(
    (),
    bool,
    char,
    u8,
    u16,
    u32,
    u64,
    u128,
    usize,
    i8,
    i16,
    i32,
    i64,
    i128,
    isize,
    f32,
    f64,
    String,
    &'static str,
    Duration,
    PathBuf,
    OsString,
);

macro_rules! lift_generic {
    ($(impl<$($p:ident $(: $b:path)?),*> $ty:ty;)*) => {
        $(
            impl<$($p: Send + 'static $(+ $b)?),*> Lift for $ty {
                const IS_EVENTUAL: bool = false;
                type Inner = Self;

                fn lift(self) -> Eventual<Self> {
                    Eventual::ready(self)
                }
            }
        )*
    };
}

lift_generic! {
    impl<T> Vec<T>;
    impl<T> VecDeque<T>;
    impl<T> HashSet<T>;
    impl<T> BTreeSet<T>;
    impl<T> Option<T>;
    impl<T> Box<T>;
    impl<T: Sync> Arc<T>;
    impl<T, E> Result<T, E>;
    impl<K, V> HashMap<K, V>;
    impl<K, V> BTreeMap<K, V>;
    impl<A, B> (A, B);
    impl<A, B, C> (A, B, C);
    impl<A, B, C, D> (A, B, C, D);
    impl<A, B, C, D, E> (A, B, C, D, E);
    impl<A, B, C, D, E, G> (A, B, C, D, E, G);
    impl<A, B, C, D, E, G, H> (A, B, C, D, E, G, H);
    impl<A, B, C, D, E, G, H, I> (A, B, C, D, E, G, H, I);
    impl<A, B, C, D, E, G, H, I, J> (A, B, C, D, E, G, H, I, J);
    impl<A, B, C, D, E, G, H, I, J, K> (A, B, C, D, E, G, H, I, J, K);
    impl<A, B, C, D, E, G, H, I, J, K, L> (A, B, C, D, E, G, H, I, J, K, L);
    impl<A, B, C, D, E, G, H, I, J, K, L, N> (A, B, C, D, E, G, H, I, J, K, L, N);
}

impl<T: Send + 'static, const N: usize> Lift for [T; N] {
    const IS_EVENTUAL: bool = false;
    type Inner = Self;

    fn lift(self) -> Eventual<Self> {
        Eventual::ready(self)
    }
}

/// Carries any value through a composition as-is.
///
/// Return `Plain(value)` from a continuation when the value's type has no
/// [`Lift`] impl of its own (a foreign type `lift_value!` cannot reach), or to
/// pass an eventual along as a value instead of flattening it.
///
/// ```
/// use deferral::resolve::Plain;
/// use deferral::Eventual;
/// use std::net::Ipv4Addr;
///
/// let addr = Eventual::ready(1_u8)
///     .then(|last: u8| Plain(Ipv4Addr::new(10, 0, 0, last)))
///     .wait();
/// assert_eq!(addr, Ok(Ipv4Addr::new(10, 0, 0, 1)));
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Plain<T>(pub T);

impl<T: Send + 'static> Lift for Plain<T> {
    const IS_EVENTUAL: bool = false;
    type Inner = T;

    fn lift(self) -> Eventual<T> {
        Eventual::ready(self.0)
    }
}

/// The raw return type of `F` resolved against `T`.
pub type RawReturn<F, T, M> = <F as Continuation<T, M>>::Output;

/// The eventual produced by composing `F` onto an `Eventual<T>`.
pub type Composed<F, T, M> = Eventual<<RawReturn<F, T, M> as Lift>::Inner>;

/// Declared shape of a callable, read from its call signature without
/// invoking it.
///
/// `Args` is the parameter list as a tuple and is inferred for closures and
/// functions alike. `FirstArg` is `()` for a callable without parameters. A
/// parameter taken by reference keeps its reference type, so
/// `fn(&mut Try<String>) -> bool` implements
/// `Extract<(&'a mut Try<String>,)>` for every `'a`.
pub trait Extract<Args> {
    /// The first declared parameter.
    type FirstArg;
    /// The value carried after flattening the return type.
    type RawReturn;
    /// The composed eventual type.
    type Return;
    /// True if the declared return type is itself an eventual.
    const RETURNS_EVENTUAL: bool;
    /// Number of declared parameters.
    const ARITY: usize;
}

impl<F, R> Extract<()> for F
where
    F: FnOnce() -> R,
    R: Lift,
{
    type FirstArg = ();
    type RawReturn = R::Inner;
    type Return = Eventual<R::Inner>;
    const RETURNS_EVENTUAL: bool = R::IS_EVENTUAL;
    const ARITY: usize = 0;
}

macro_rules! extract_fn {
    ($arity:expr; $first:ident $(, $rest:ident)*) => {
        impl<F, R, $first $(, $rest)*> Extract<($first, $($rest,)*)> for F
        where
            F: FnOnce($first $(, $rest)*) -> R,
            R: Lift,
        {
            type FirstArg = $first;
            type RawReturn = R::Inner;
            type Return = Eventual<R::Inner>;
            const RETURNS_EVENTUAL: bool = R::IS_EVENTUAL;
            const ARITY: usize = $arity;
        }
    };
}

extract_fn!(1; A);
extract_fn!(2; A, B);
extract_fn!(3; A, B, C);
extract_fn!(4; A, B, C, D);

/// Runtime description of a callable's declared shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shape {
    /// Number of declared parameters.
    pub arity: usize,
    /// Name of the first parameter type, `"()"` when there is none.
    pub first_arg: &'static str,
    /// Name of the value the composed eventual carries.
    pub raw_return: &'static str,
    /// True if the declared return type was flattened.
    pub returns_eventual: bool,
}

/// Describes the declared shape of `F`.
#[must_use]
pub fn shape<Args, F: Extract<Args>>() -> Shape {
    Shape {
        arity: F::ARITY,
        first_arg: type_name::<F::FirstArg>(),
        raw_return: type_name::<F::RawReturn>(),
        returns_eventual: F::RETURNS_EVENTUAL,
    }
}

/// Like [`shape`], inferring the callable type from a reference.
#[must_use]
pub fn shape_of<Args, F: Extract<Args>>(_callable: &F) -> Shape {
    shape::<Args, F>()
}

/// Runtime description of a resolved continuation, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    /// The calling form.
    pub form: CallForm,
    /// Name of the raw return type.
    pub raw_return: &'static str,
    /// True if the raw return type was flattened.
    pub returns_eventual: bool,
    /// Name of the composed eventual type.
    pub composed: &'static str,
}

/// Describes how `F` resolves against input type `T`.
#[must_use]
pub fn signature<T, M, F>() -> Signature
where
    F: Continuation<T, M>,
    F::Output: Lift,
{
    Signature {
        form: F::FORM,
        raw_return: type_name::<F::Output>(),
        returns_eventual: <F::Output as Lift>::IS_EVENTUAL,
        composed: type_name::<Composed<F, T, M>>(),
    }
}

/// Like [`signature`], inferring the callable type from a reference.
#[must_use]
pub fn signature_of<T, M, F>(_callable: &F) -> Signature
where
    F: Continuation<T, M>,
    F::Output: Lift,
{
    signature::<T, M, F>()
}

/// Invokes `f` in its resolved form. A panic inside `f` becomes
/// [`Error::Panicked`].
pub fn invoke<T, M, F>(f: F, input: Try<T>) -> Try<F::Output>
where
    F: Continuation<T, M>,
{
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || f.call_with(input))) {
        Ok(result) => result,
        Err(payload) => {
            let payload = PanicPayload::from_panic(payload.as_ref());
            debug!(panic = %payload, "continuation panicked");
            Err(Error::Panicked(payload))
        }
    }
}
