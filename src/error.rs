//! Error types used by the scriptvisor runtime, the thread pool and scripts.
//!
//! - [`ConfigError`]: rejected configuration (fatal to startup).
//! - [`PoolError`]: admission and thread lifecycle failures of the pool.
//! - [`RuntimeError`]: failures of the worker supervisor itself.
//! - [`ScriptError`]: outcome of one script iteration, returned by the interpreter runtime.
//! - [`ThreadInitError`]: the interpreter runtime could not initialize a thread.
//! - [`StartError`]: the single aggregated error a host sees at startup.
//!
//! All enums provide `as_label` (stable snake_case for logs/metrics).

use std::time::Duration;
use thiserror::Error;

use crate::runtime::ThreadId;

/// # Configuration errors.
///
/// Produced while applying configuration options or when the supervisor
/// validates the complete worker set. Never recovered: startup is aborted.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A thread count, wait time or other tunable was rejected.
    #[error("invalid config: {reason}")]
    InvalidConfig {
        /// What was wrong with the value.
        reason: String,
    },

    /// A worker declaration was rejected.
    #[error("invalid worker `{worker}`: {reason}")]
    InvalidWorkerSpec {
        /// Declared worker name (may be empty when the name itself is invalid).
        worker: String,
        /// What was wrong with the declaration.
        reason: String,
    },

    /// Two declarations share the same name.
    #[error("duplicate worker name `{name}`")]
    DuplicateWorker {
        /// The name declared more than once.
        name: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        ConfigError::InvalidConfig {
            reason: reason.into(),
        }
    }

    pub(crate) fn worker(worker: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::InvalidWorkerSpec {
            worker: worker.into(),
            reason: reason.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use scriptvisor::ConfigError;
    ///
    /// let err = ConfigError::DuplicateWorker { name: "mailer".into() };
    /// assert_eq!(err.as_label(), "config_duplicate_worker");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            ConfigError::InvalidConfig { .. } => "config_invalid",
            ConfigError::InvalidWorkerSpec { .. } => "config_invalid_worker",
            ConfigError::DuplicateWorker { .. } => "config_duplicate_worker",
        }
    }
}

/// # Errors produced by the thread pool.
///
/// `PoolExhausted` and `ThreadInitFailure` are local to the call that
/// triggered them. `ForeignGrant` and `NotReserved` flag misuse by the caller.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// No thread became available within the admission wait.
    #[error("no thread available after waiting {waited:?}")]
    PoolExhausted {
        /// How long the caller waited before being rejected.
        waited: Duration,
    },

    /// The interpreter runtime failed to initialize a new thread.
    #[error("failed to start {thread}: {reason}")]
    ThreadInitFailure {
        /// Thread that failed to start.
        thread: ThreadId,
        /// Error reported by the runtime.
        reason: String,
    },

    /// A grant issued by a different pool was released here.
    #[error("{thread} was not granted by this pool")]
    ForeignGrant {
        /// Thread named by the foreign grant.
        thread: ThreadId,
    },

    /// The thread is not currently reserved (already idle or unknown).
    #[error("{thread} is not reserved")]
    NotReserved {
        /// Offending thread.
        thread: ThreadId,
    },

    /// The pool has been closed.
    #[error("thread pool closed")]
    Closed,
}

impl PoolError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use scriptvisor::PoolError;
    /// use std::time::Duration;
    ///
    /// let err = PoolError::PoolExhausted { waited: Duration::from_millis(50) };
    /// assert_eq!(err.as_label(), "pool_exhausted");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            PoolError::PoolExhausted { .. } => "pool_exhausted",
            PoolError::ThreadInitFailure { .. } => "pool_thread_init_failure",
            PoolError::ForeignGrant { .. } => "pool_foreign_grant",
            PoolError::NotReserved { .. } => "pool_not_reserved",
            PoolError::Closed => "pool_closed",
        }
    }

    /// True for errors that describe caller misuse rather than load or runtime failures.
    pub fn is_programming_error(&self) -> bool {
        matches!(
            self,
            PoolError::ForeignGrant { .. } | PoolError::NotReserved { .. }
        )
    }
}

/// # Errors produced by the worker supervisor.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// A worker declaration exceeded its abnormal-restart threshold; its instances stopped.
    #[error("worker `{worker}` gave up after {failures} consecutive failures: {error}")]
    WorkerFatal {
        /// Worker declaration name.
        worker: String,
        /// Consecutive abnormal terminations observed.
        failures: u32,
        /// Last failure message.
        error: String,
    },

    /// Shutdown grace period was exceeded; some instances remained stuck.
    #[error("shutdown timeout {grace:?} exceeded; stuck: {stuck:?}")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Instances that did not shut down in time.
        stuck: Vec<String>,
    },
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::WorkerFatal { .. } => "runtime_worker_fatal",
            RuntimeError::GraceExceeded { .. } => "runtime_grace_exceeded",
        }
    }
}

/// # Outcome of one script iteration.
///
/// Returned by [`ScriptRuntime::run_worker`](crate::ScriptRuntime::run_worker).
/// `Fail` is retried with backoff, `Fatal` gives up on the declaration at once,
/// `Canceled` is a graceful exit.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    /// The script terminated abnormally but may succeed if restarted.
    #[error("script failed: {error}")]
    Fail {
        /// The underlying error message.
        error: String,
    },

    /// Non-recoverable failure (e.g. the entry-point script does not exist).
    #[error("fatal script error (no retry): {error}")]
    Fatal {
        /// The underlying error message.
        error: String,
    },

    /// The iteration observed cancellation and stopped early.
    #[error("script cancelled")]
    Canceled,
}

impl ScriptError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use scriptvisor::ScriptError;
    ///
    /// let err = ScriptError::Fail { error: "uncaught exception".into() };
    /// assert_eq!(err.as_label(), "script_failed");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            ScriptError::Fail { .. } => "script_failed",
            ScriptError::Fatal { .. } => "script_fatal",
            ScriptError::Canceled => "script_canceled",
        }
    }

    /// Indicates whether restarting the instance may help.
    ///
    /// # Example
    /// ```
    /// use scriptvisor::ScriptError;
    ///
    /// assert!(ScriptError::Fail { error: "boom".into() }.is_retryable());
    /// assert!(!ScriptError::Fatal { error: "missing file".into() }.is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        matches!(self, ScriptError::Fail { .. })
    }
}

/// The interpreter runtime could not initialize a thread.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{reason}")]
pub struct ThreadInitError {
    /// Error reported by the runtime.
    pub reason: String,
}

impl ThreadInitError {
    /// Creates an init error with the given message.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// # Startup failure.
///
/// The host sees either a clean start or exactly one of these.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StartError {
    /// Configuration was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The pool could not bring up its threads (floor or worker instances).
    #[error(transparent)]
    Pool(#[from] PoolError),
}

impl StartError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            StartError::Config(e) => e.as_label(),
            StartError::Pool(e) => e.as_label(),
        }
    }
}
