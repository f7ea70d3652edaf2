//! # Runtime configuration.
//!
//! [`Config`] holds every tunable of the pool and the worker supervisor. It is
//! built once by applying ordered [`ConfigOption`] steps and then shared
//! read-only (as `Arc<Config>`) by the pool, the supervisor and the engine.
//!
//! ```text
//! [with_num_threads(4), with_workers(..), ...]
//!        │ applied in order, first error aborts
//!        ▼
//!   ConfigBuilder ──build()──► Config ──Arc──► ThreadPool / Supervisor
//! ```
//!
//! ## Sentinel values
//! - `max_threads = 0` → equal to `num_threads`; the effective ceiling is
//!   always `max(num_threads, max_threads)`
//! - `max_wait_time = 0s` → fail fast: `acquire` is rejected at once when no
//!   thread is free and the pool cannot grow
//!
//! ## Example
//! ```
//! use std::time::Duration;
//! use scriptvisor::config::{self, Config};
//!
//! let cfg = Config::from_options([
//!     config::with_num_threads(4),
//!     config::with_max_threads(8),
//!     config::with_max_wait_time(Duration::from_millis(50)),
//!     config::with_workers("mailer", "worker.php", 2, [("QUEUE", "mail")], ["src/**/*.php"]),
//! ])
//! .unwrap();
//!
//! assert_eq!(cfg.num_threads(), 4);
//! assert_eq!(cfg.effective_max_threads(), 8);
//! assert_eq!(cfg.workers().len(), 1);
//! ```

mod options;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ConfigError;
use crate::metrics::{Metrics, NullMetrics};
use crate::policies::{BackoffPolicy, FailurePolicy};
use crate::runtime::IniOverrides;
use crate::subscribers::{LogWriter, Subscribe};
use crate::workers::WorkerDeclaration;

pub use options::{
    ConfigOption, with_bus_capacity, with_logger, with_max_threads, with_max_wait_time,
    with_metrics, with_num_threads, with_php_ini, with_restart_grace, with_shutdown_grace,
    with_watch_debounce, with_worker_backoff, with_worker_failures, with_workers,
};

/// Immutable runtime configuration.
///
/// Obtain one through [`Config::from_options`], [`ConfigBuilder`] or
/// [`Config::default`]; fields are read through accessors.
#[derive(Clone)]
pub struct Config {
    pub(crate) num_threads: usize,
    pub(crate) max_threads: usize,
    pub(crate) max_wait_time: Duration,
    pub(crate) php_ini: IniOverrides,
    pub(crate) logger: Arc<dyn Subscribe>,
    pub(crate) metrics: Arc<dyn Metrics>,
    pub(crate) workers: Vec<WorkerDeclaration>,
    pub(crate) shutdown_grace: Duration,
    pub(crate) restart_grace: Duration,
    pub(crate) watch_debounce: Duration,
    pub(crate) worker_backoff: BackoffPolicy,
    pub(crate) worker_failures: FailurePolicy,
    pub(crate) bus_capacity: usize,
}

impl Config {
    /// Applies `options` in order to a default configuration.
    ///
    /// Stops at the first failing option and returns its error; no partial
    /// configuration escapes.
    pub fn from_options<I>(options: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = ConfigOption>,
    {
        let mut builder = ConfigBuilder::new();
        for opt in options {
            builder = builder.apply(opt)?;
        }
        Ok(builder.build())
    }

    /// Floor of warm threads kept for the process lifetime.
    #[inline]
    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    /// Configured ceiling as given (`0` = same as the floor).
    #[inline]
    pub fn max_threads(&self) -> usize {
        self.max_threads
    }

    /// Ceiling of request threads: `max(num_threads, max_threads)`.
    #[inline]
    pub fn effective_max_threads(&self) -> usize {
        self.num_threads.max(self.max_threads)
    }

    /// How long `acquire` may wait for a thread (`0` = fail fast).
    #[inline]
    pub fn max_wait_time(&self) -> Duration {
        self.max_wait_time
    }

    /// INI overrides forwarded verbatim to every thread initialization.
    #[inline]
    pub fn php_ini(&self) -> &IniOverrides {
        &self.php_ini
    }

    #[inline]
    pub fn logger(&self) -> &Arc<dyn Subscribe> {
        &self.logger
    }

    #[inline]
    pub fn metrics(&self) -> &Arc<dyn Metrics> {
        &self.metrics
    }

    /// Worker declarations in declaration order.
    #[inline]
    pub fn workers(&self) -> &[WorkerDeclaration] {
        &self.workers
    }

    /// Time the supervisor waits for instances to stop on shutdown.
    #[inline]
    pub fn shutdown_grace(&self) -> Duration {
        self.shutdown_grace
    }

    /// Time an instance may keep running its iteration once a restart is pending.
    #[inline]
    pub fn restart_grace(&self) -> Duration {
        self.restart_grace
    }

    /// Coalescing window for file changes.
    #[inline]
    pub fn watch_debounce(&self) -> Duration {
        self.watch_debounce
    }

    #[inline]
    pub fn worker_backoff(&self) -> BackoffPolicy {
        self.worker_backoff
    }

    #[inline]
    pub fn worker_failures(&self) -> FailurePolicy {
        self.worker_failures
    }

    #[inline]
    pub fn bus_capacity(&self) -> usize {
        self.bus_capacity
    }

    /// Checks that no two declarations share a name.
    pub(crate) fn check_unique_workers(&self) -> Result<(), ConfigError> {
        let mut seen = std::collections::HashSet::with_capacity(self.workers.len());
        for decl in &self.workers {
            if !seen.insert(decl.name()) {
                return Err(ConfigError::DuplicateWorker {
                    name: decl.name().to_string(),
                });
            }
        }
        Ok(())
    }
}

fn default_num_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get() * 2)
        .unwrap_or(2)
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `num_threads = 2 × available CPUs` (2 when unknown)
    /// - `max_threads = 0` (ceiling equals the floor)
    /// - `max_wait_time = 5s`
    /// - `logger = LogWriter`, `metrics = NullMetrics`
    /// - `shutdown_grace = 30s`, `restart_grace = 5s`, `watch_debounce = 150ms`
    /// - `worker_backoff`/`worker_failures` = policy defaults
    /// - `bus_capacity = 1024`
    fn default() -> Self {
        Self {
            num_threads: default_num_threads(),
            max_threads: 0,
            max_wait_time: Duration::from_secs(5),
            php_ini: IniOverrides::new(),
            logger: Arc::new(LogWriter),
            metrics: Arc::new(NullMetrics),
            workers: Vec::new(),
            shutdown_grace: Duration::from_secs(30),
            restart_grace: Duration::from_secs(5),
            watch_debounce: Duration::from_millis(150),
            worker_backoff: BackoffPolicy::default(),
            worker_failures: FailurePolicy::default(),
            bus_capacity: 1024,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("num_threads", &self.num_threads)
            .field("max_threads", &self.max_threads)
            .field("max_wait_time", &self.max_wait_time)
            .field("php_ini", &self.php_ini)
            .field("logger", &self.logger.name())
            .field("workers", &self.workers)
            .field("shutdown_grace", &self.shutdown_grace)
            .field("restart_grace", &self.restart_grace)
            .field("watch_debounce", &self.watch_debounce)
            .field("worker_backoff", &self.worker_backoff)
            .field("worker_failures", &self.worker_failures)
            .field("bus_capacity", &self.bus_capacity)
            .finish_non_exhaustive()
    }
}

/// Accumulates options before freezing them into a [`Config`].
///
/// Custom options are plain closures over the builder:
/// ```
/// use scriptvisor::config::{ConfigBuilder, ConfigOption};
///
/// let floor_of_one: ConfigOption = Box::new(|b| b.num_threads(1));
/// let cfg = ConfigBuilder::new().apply(floor_of_one).unwrap().build();
/// assert_eq!(cfg.num_threads(), 1);
/// ```
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Starts from [`Config::default`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one option; the builder is consumed on failure.
    pub fn apply(mut self, opt: ConfigOption) -> Result<Self, ConfigError> {
        opt(&mut self)?;
        Ok(self)
    }

    pub fn build(self) -> Config {
        self.config
    }

    /// Sets the floor (`>= 1`).
    pub fn num_threads(&mut self, n: usize) -> Result<(), ConfigError> {
        if n == 0 {
            return Err(ConfigError::invalid("num_threads must be at least 1"));
        }
        self.config.num_threads = n;
        Ok(())
    }

    /// Sets the ceiling (`0` = same as the floor).
    pub fn max_threads(&mut self, n: usize) -> Result<(), ConfigError> {
        self.config.max_threads = n;
        Ok(())
    }

    pub fn max_wait_time(&mut self, d: Duration) -> Result<(), ConfigError> {
        self.config.max_wait_time = d;
        Ok(())
    }

    /// Replaces the INI overrides; names must be non-empty.
    pub fn php_ini(&mut self, ini: IniOverrides) -> Result<(), ConfigError> {
        if ini.keys().any(|k| k.trim().is_empty()) {
            return Err(ConfigError::invalid("php_ini setting name is empty"));
        }
        self.config.php_ini = ini;
        Ok(())
    }

    pub fn logger(&mut self, logger: Arc<dyn Subscribe>) -> Result<(), ConfigError> {
        self.config.logger = logger;
        Ok(())
    }

    pub fn metrics(&mut self, metrics: Arc<dyn Metrics>) -> Result<(), ConfigError> {
        self.config.metrics = metrics;
        Ok(())
    }

    /// Appends a declaration.
    pub fn worker(&mut self, decl: WorkerDeclaration) -> Result<(), ConfigError> {
        self.config.workers.push(decl);
        Ok(())
    }

    pub fn shutdown_grace(&mut self, d: Duration) -> Result<(), ConfigError> {
        self.config.shutdown_grace = d;
        Ok(())
    }

    pub fn restart_grace(&mut self, d: Duration) -> Result<(), ConfigError> {
        self.config.restart_grace = d;
        Ok(())
    }

    pub fn watch_debounce(&mut self, d: Duration) -> Result<(), ConfigError> {
        self.config.watch_debounce = d;
        Ok(())
    }

    pub fn worker_backoff(&mut self, policy: BackoffPolicy) -> Result<(), ConfigError> {
        policy.validate()?;
        self.config.worker_backoff = policy;
        Ok(())
    }

    pub fn worker_failures(&mut self, policy: FailurePolicy) -> Result<(), ConfigError> {
        policy.validate()?;
        self.config.worker_failures = policy;
        Ok(())
    }

    /// Sets the event bus capacity (`>= 1`).
    pub fn bus_capacity(&mut self, n: usize) -> Result<(), ConfigError> {
        if n == 0 {
            return Err(ConfigError::invalid("bus_capacity must be at least 1"));
        }
        self.config.bus_capacity = n;
        Ok(())
    }
}
