//! # Interpreter runtime boundary.
//!
//! The embedded interpreter is an external collaborator. This module defines the
//! contract the pool and the supervisor rely on:
//! - [`ScriptRuntime::init_thread`] prepares a thread, receiving the INI overrides verbatim;
//! - [`ScriptRuntime::run_worker`] runs one iteration of a persistent worker script;
//! - [`ScriptRuntime::shutdown_thread`] tears a thread down.
//!
//! A worker iteration receives a [`CancellationToken`] and should check it to
//! stop cooperatively on restart or shutdown.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{ScriptError, ThreadInitError};
use crate::workers::PreparedEnv;

/// Interpreter settings forwarded to every thread at initialization.
pub type IniOverrides = BTreeMap<String, String>;

/// Identifier of an execution thread, unique within one pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub(crate) u64);

impl ThreadId {
    /// Raw numeric id.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "thread-{}", self.0)
    }
}

/// One iteration of a persistent worker script.
#[derive(Debug, Clone, Copy)]
pub struct WorkerJob<'a> {
    /// Declaration name.
    pub worker: &'a str,
    /// Instance index within the declaration (0-based).
    pub instance: u32,
    /// Entry-point script.
    pub script: &'a Path,
    /// Environment to inject into the script's process-local environment.
    pub env: &'a PreparedEnv,
    /// Iteration counter for this instance (1-based, monotonic across restarts).
    pub iteration: u64,
}

/// # Embedded interpreter runtime.
///
/// # Example
/// ```
/// use async_trait::async_trait;
/// use tokio_util::sync::CancellationToken;
/// use scriptvisor::{IniOverrides, ScriptError, ScriptRuntime, ThreadId, ThreadInitError, WorkerJob};
///
/// struct Echo;
///
/// #[async_trait]
/// impl ScriptRuntime for Echo {
///     async fn init_thread(&self, _t: ThreadId, _ini: &IniOverrides) -> Result<(), ThreadInitError> {
///         Ok(())
///     }
///
///     async fn run_worker(
///         &self,
///         _t: ThreadId,
///         job: &WorkerJob<'_>,
///         ctx: CancellationToken,
///     ) -> Result<(), ScriptError> {
///         if ctx.is_cancelled() {
///             return Err(ScriptError::Canceled);
///         }
///         println!("{} iteration {}", job.worker, job.iteration);
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait ScriptRuntime: Send + Sync + 'static {
    /// Prepares `thread` for executing scripts. `ini` is passed through untouched.
    async fn init_thread(&self, thread: ThreadId, ini: &IniOverrides)
    -> Result<(), ThreadInitError>;

    /// Runs the worker script once on `thread`.
    ///
    /// Returning `Ok(())` is normal completion; the supervisor starts the next iteration.
    async fn run_worker(
        &self,
        thread: ThreadId,
        job: &WorkerJob<'_>,
        ctx: CancellationToken,
    ) -> Result<(), ScriptError>;

    /// Releases interpreter resources held by `thread`.
    fn shutdown_thread(&self, _thread: ThreadId) {}
}
