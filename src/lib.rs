//! Deferral: late binding of continuations to execution contexts.
//!
//! # Overview
//!
//! A producer often knows *what* should run after an asynchronous value
//! completes long before anyone knows *where* it should run. Deferral lets the
//! producer attach that continuation to a [`DeferredExecutor`] and lets a
//! consumer bind an execution context to it later, in either order and from
//! either thread. The continuation is submitted exactly once, to the context
//! that was bound.
//!
//! # Core Guarantees
//!
//! - **Exactly once**: attach-work and attach-executor race through a single
//!   compare-and-swap; whichever side arrives second performs the submission
//! - **Non-blocking**: neither attach path ever parks the calling thread
//! - **Reentrant**: work attached while the cell is already running executes
//!   inline instead of re-entering the executor
//! - **Shared lifetime**: the cell lives exactly as long as its keep-alive tokens
//! - **Resolved at compile time**: continuation calling forms and result
//!   flattening are decided by trait resolution, never at runtime
//!
//! # Module Structure
//!
//! - [`executor`]: Work items, the [`Executor`] trait, keep-alive handles and
//!   the bundled executors
//! - [`executor::deferred`]: The deferred work cell
//! - [`resolve`]: Continuation-signature resolution
//! - [`eventual`]: Minimal promise/eventual pair the core composes onto
//! - [`config`]: Thread pool configuration
//! - [`error`]: Error types and the wrapped-result alias [`Try`]

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]

pub mod config;
pub mod error;
pub mod eventual;
pub mod executor;
pub mod resolve;
pub mod tracing_compat;

#[cfg(test)]
pub(crate) mod test_utils;

pub use config::PoolConfig;
pub use error::{ConfigError, Error, ErrorKind, PanicPayload, Try};
pub use eventual::{Eventual, Promise, SemiEventual};
pub use executor::deferred::{DeferredExecutor, DeferredKeepAlive, DeferredState};
pub use executor::pool::ThreadPool;
pub use executor::{keep_alive, Executor, InlineExecutor, KeepAlive, ManualExecutor, Work};
pub use resolve::{CallForm, Continuation, Extract, Lift, Plain};
