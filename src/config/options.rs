//! Option constructors applied by [`Config::from_options`](super::Config::from_options).
//!
//! Each `with_*` function captures its arguments and returns a [`ConfigOption`];
//! validation happens when the option is applied, so an invalid value surfaces
//! as the error of the build that uses it.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ConfigError;
use crate::metrics::Metrics;
use crate::policies::{BackoffPolicy, FailurePolicy};
use crate::runtime::IniOverrides;
use crate::subscribers::Subscribe;
use crate::workers::WorkerDeclaration;

use super::ConfigBuilder;

/// One configuration step. Options are applied strictly in order.
pub type ConfigOption = Box<dyn FnOnce(&mut ConfigBuilder) -> Result<(), ConfigError> + Send>;

/// Number of threads started eagerly and kept warm (`>= 1`).
pub fn with_num_threads(n: usize) -> ConfigOption {
    Box::new(move |b| b.num_threads(n))
}

/// Ceiling the pool may grow to under load (`0` = same as `num_threads`).
pub fn with_max_threads(n: usize) -> ConfigOption {
    Box::new(move |b| b.max_threads(n))
}

/// Maximum time a request waits for a thread; `Duration::ZERO` rejects at once.
pub fn with_max_wait_time(d: Duration) -> ConfigOption {
    Box::new(move |b| b.max_wait_time(d))
}

/// INI settings forwarded to the interpreter at thread initialization.
///
/// Replaces any earlier overrides.
pub fn with_php_ini<I, K, V>(overrides: I) -> ConfigOption
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    let ini: IniOverrides = overrides
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect();
    Box::new(move |b| b.php_ini(ini))
}

/// Logging sink receiving every runtime event.
pub fn with_logger(logger: Arc<dyn Subscribe>) -> ConfigOption {
    Box::new(move |b| b.logger(logger))
}

/// Metrics sink receiving pool gauges and worker counters.
pub fn with_metrics(metrics: Arc<dyn Metrics>) -> ConfigOption {
    Box::new(move |b| b.metrics(metrics))
}

/// Declares a worker; every call appends one declaration.
///
/// ```
/// use scriptvisor::config::{self, Config};
///
/// let cfg = Config::from_options([
///     config::with_workers("mailer", "bin/mailer.php", 2, [("QUEUE", "mail")], ["src/**/*.php"]),
/// ]).unwrap();
/// assert_eq!(cfg.workers()[0].env().get("QUEUE"), Some("mail"));
/// ```
pub fn with_workers<E, K, V, W, S>(
    name: impl Into<String>,
    script: impl Into<PathBuf>,
    num: u32,
    env: E,
    watch: W,
) -> ConfigOption
where
    E: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
    W: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let name = name.into();
    let script = script.into();
    let env: Vec<(String, String)> = env
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect();
    let watch: Vec<String> = watch.into_iter().map(|s| s.as_ref().to_string()).collect();

    Box::new(move |b| {
        let decl = WorkerDeclaration::new(name, script, num, env, watch)?;
        b.worker(decl)
    })
}

/// How long shutdown waits for worker instances before giving up.
pub fn with_shutdown_grace(d: Duration) -> ConfigOption {
    Box::new(move |b| b.shutdown_grace(d))
}

/// How long a pending restart lets the current iteration run before cancelling it.
pub fn with_restart_grace(d: Duration) -> ConfigOption {
    Box::new(move |b| b.restart_grace(d))
}

/// Window over which rapid file changes collapse into one restart.
pub fn with_watch_debounce(d: Duration) -> ConfigOption {
    Box::new(move |b| b.watch_debounce(d))
}

pub fn with_worker_backoff(policy: BackoffPolicy) -> ConfigOption {
    Box::new(move |b| b.worker_backoff(policy))
}

pub fn with_worker_failures(policy: FailurePolicy) -> ConfigOption {
    Box::new(move |b| b.worker_failures(policy))
}

pub fn with_bus_capacity(n: usize) -> ConfigOption {
    Box::new(move |b| b.bus_capacity(n))
}
