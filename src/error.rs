//! Error types and error handling strategy for Deferral.
//!
//! Two very different kinds of failure exist in this crate:
//!
//! - **Carried failures** travel inside a [`Try`] from one continuation to the
//!   next: a panicking continuation, a promise dropped without a result
//!   (including one captured by work an executor discarded). They are
//!   ordinary values described by [`Error`].
//! - **Contract violations** (attaching a second work item to a deferred
//!   executor, binding it to two executors) are programming errors. They are
//!   never converted into an [`Error`]; they panic at the point of detection so
//!   that a continuation can neither run twice nor silently vanish.
//!
//! Configuration problems are reported separately through [`ConfigError`].

use core::fmt;
use std::any::Any;
use std::sync::Arc;

/// The wrapped result handed to continuations that want to observe failure.
///
/// Holds either the value produced by the previous step or the [`Error`]
/// that step failed with.
pub type Try<T> = std::result::Result<T, Error>;

/// Payload from a caught panic.
///
/// This wraps the panic value for safe transport across thread boundaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanicPayload {
    message: String,
}

impl PanicPayload {
    /// Creates a new panic payload with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Extracts a message from the payload returned by `catch_unwind`.
    #[must_use]
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        Self { message }
    }

    /// Returns the panic message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for PanicPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "panic: {}", self.message)
    }
}

/// The kind of a carried failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A continuation panicked.
    Panicked,
    /// The producing promise was dropped without a result.
    BrokenPromise,
    /// Failure supplied by user code.
    User,
}

/// A failure carried inside a [`Try`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// A continuation panicked while running.
    #[error("continuation {0}")]
    Panicked(PanicPayload),
    /// The promise was dropped before it was fulfilled.
    #[error("promise dropped without a result")]
    BrokenPromise,
    /// Failure raised by user code.
    #[error("{0}")]
    User(Arc<str>),
}

impl Error {
    /// Creates a user failure with the given message.
    #[must_use]
    pub fn msg(message: impl AsRef<str>) -> Self {
        Self::User(Arc::from(message.as_ref()))
    }

    /// Returns the kind of this failure.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Panicked(_) => ErrorKind::Panicked,
            Self::BrokenPromise => ErrorKind::BrokenPromise,
            Self::User(_) => ErrorKind::User,
        }
    }
}

/// Errors raised while building a pool configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable was set to a value that does not parse.
    #[error("invalid value {value:?} for {var}: {reason}")]
    InvalidEnvVar {
        /// Variable name.
        var: &'static str,
        /// Raw value found in the environment.
        value: String,
        /// Why it was rejected.
        reason: String,
    },
    /// A pool needs at least one worker thread.
    #[error("worker_threads must be at least 1")]
    ZeroWorkers,
    /// The thread name prefix is empty.
    #[error("thread_name_prefix must not be empty")]
    EmptyThreadName,
    /// The operating system refused to start a worker thread.
    #[error("failed to spawn worker thread: {0}")]
    ThreadSpawn(String),
}
