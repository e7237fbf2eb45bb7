//! Thread pool configuration.
//!
//! # Configuration Precedence
//!
//! Settings are resolved in this order (highest priority first):
//!
//! 1. **Programmatic**: fields set on a [`PoolConfig`] after loading
//! 2. **Environment variables**: values from `DEFERRAL_*` env vars
//! 3. **Host config file**: [`PoolConfig`] deserializes with serde, so a host
//!    can embed it in its own configuration
//! 4. **Defaults**: [`PoolConfig::default()`]
//!
//! # Supported Environment Variables
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `DEFERRAL_WORKER_THREADS` | `usize` | `worker_threads` |
//! | `DEFERRAL_THREAD_NAME_PREFIX` | `String` | `thread_name_prefix` |

use crate::error::ConfigError;
use serde::Deserialize;

/// Environment variable name for worker thread count.
pub const ENV_WORKER_THREADS: &str = "DEFERRAL_WORKER_THREADS";
/// Environment variable name for thread name prefix.
pub const ENV_THREAD_NAME_PREFIX: &str = "DEFERRAL_THREAD_NAME_PREFIX";

/// Default thread name prefix for pool workers.
pub const DEFAULT_THREAD_NAME_PREFIX: &str = "deferral-worker";

/// Configuration for a [`ThreadPool`](crate::executor::pool::ThreadPool).
///
/// | Field | Default |
/// |-------|---------|
/// | `worker_threads` | available CPU parallelism |
/// | `thread_name_prefix` | `"deferral-worker"` |
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of worker threads.
    pub worker_threads: usize,
    /// Prefix for worker thread names; workers are suffixed with their index.
    pub thread_name_prefix: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            worker_threads: std::thread::available_parallelism().map_or(1, usize::from),
            thread_name_prefix: DEFAULT_THREAD_NAME_PREFIX.to_string(),
        }
    }
}

impl PoolConfig {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply environment variable overrides in place.
    ///
    /// Only variables that are set are applied. A set but unparseable
    /// variable is an error.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(val) = read_env(ENV_WORKER_THREADS) {
            self.worker_threads = parse_usize(ENV_WORKER_THREADS, &val)?;
        }
        if let Some(val) = read_env(ENV_THREAD_NAME_PREFIX) {
            self.thread_name_prefix = val;
        }
        Ok(())
    }

    /// Sets the worker thread count.
    #[must_use]
    pub fn worker_threads(mut self, n: usize) -> Self {
        self.worker_threads = n;
        self
    }

    /// Sets the worker thread name prefix.
    #[must_use]
    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Checks the configuration is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_threads == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        if self.thread_name_prefix.is_empty() {
            return Err(ConfigError::EmptyThreadName);
        }
        Ok(())
    }
}

fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn parse_usize(var: &'static str, val: &str) -> Result<usize, ConfigError> {
    val.trim()
        .parse::<usize>()
        .map_err(|e| ConfigError::InvalidEnvVar {
            var,
            value: val.to_string(),
            reason: e.to_string(),
        })
}
