//! # scriptvisor
//!
//! **Scriptvisor** is the thread-management core of an embedded script
//! interpreter server. It keeps a pool of interpreter-bound execution threads
//! sized between a warm floor and an elastic ceiling, applies admission control
//! to incoming requests, and supervises persistent "worker" scripts that hold a
//! dedicated thread each and restart when their watched files change.
//!
//! The interpreter itself is an external collaborator behind [`ScriptRuntime`].
//!
//! ## Architecture
//! ### Overview
//! ```text
//!     ConfigOption … ──► Config ──────────────┐
//!                                             ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Engine (process context)                                         │
//! │  - Bus (broadcast events)                                         │
//! │  - SubscriberSet (logger fan-out, bounded queues)                 │
//! │  - ThreadPool (floor / ceiling / admission / waiters)             │
//! │  - Supervisor (worker declarations, restarts, shutdown)           │
//! └──────┬──────────────────────────────┬─────────────────────────────┘
//!        │ acquire / release            │ acquire_worker × instances
//!        ▼                              ▼
//!  request handlers              ┌──────────────┐   ┌──────────────┐
//!  (host HTTP layer)             │ WorkerActor  │   │ WorkerActor  │
//!                                │  mailer#0    │   │  mailer#1    │
//!                                └──────┬───────┘   └──────┬───────┘
//!                                       ▼                  ▼
//!                               ScriptRuntime::run_worker (loop)
//!
//!  notify watches ─┐
//!  notify_change() ┴─► coalescer (debounce) ─► restart generation ─► actors
//! ```
//!
//! ### Admission
//! ```text
//! acquire()
//!   ├─ idle thread?                  ─► Reserved, granted
//!   ├─ live < ceiling?               ─► init a new thread (outside the lock)
//!   ├─ max_wait_time == 0?           ─► PoolExhausted (fail fast)
//!   └─ enqueue FIFO, wait ≤ max_wait ─► handed off on release | PoolExhausted
//! ```
//!
//! ## Features
//! | Area              | Description                                                  | Key types / traits                          |
//! |-------------------|--------------------------------------------------------------|---------------------------------------------|
//! | **Configuration** | Ordered, fail-fast options with sentinel defaults.           | [`Config`], [`config::ConfigOption`]        |
//! | **Pool**          | Warm floor, elastic ceiling, FIFO waiters, resize.           | [`ThreadPool`], [`ThreadGrant`]             |
//! | **Workers**       | Declarations with env and watch patterns.                    | [`WorkerDeclaration`], [`WatchPattern`]     |
//! | **Supervision**   | Restarts on change, backoff, fatal isolation, shutdown.      | [`Supervisor`], [`WorkerStatus`]            |
//! | **Policies**      | Restart delay and give-up thresholds.                        | [`BackoffPolicy`], [`FailurePolicy`]        |
//! | **Observability** | Events, logger subscribers, metrics sink.                    | [`Event`], [`Subscribe`], [`Metrics`]       |
//! | **Errors**        | Typed errors with stable labels.                             | [`StartError`], [`PoolError`], [`RuntimeError`] |
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use async_trait::async_trait;
//! use tokio_util::sync::CancellationToken;
//! use scriptvisor::{
//!     config, Engine, IniOverrides, ScriptError, ScriptRuntime, ThreadId, ThreadInitError, WorkerJob,
//! };
//!
//! struct Interpreter;
//!
//! #[async_trait]
//! impl ScriptRuntime for Interpreter {
//!     async fn init_thread(&self, _t: ThreadId, _ini: &IniOverrides) -> Result<(), ThreadInitError> {
//!         Ok(())
//!     }
//!
//!     async fn run_worker(
//!         &self,
//!         _t: ThreadId,
//!         _job: &WorkerJob<'_>,
//!         ctx: CancellationToken,
//!     ) -> Result<(), ScriptError> {
//!         ctx.cancelled().await;
//!         Err(ScriptError::Canceled)
//!     }
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = Engine::from_options(
//!         [
//!             config::with_num_threads(2),
//!             config::with_max_threads(4),
//!             config::with_max_wait_time(Duration::from_millis(100)),
//!             config::with_workers("mailer", "mailer.php", 1, [("QUEUE", "mail")], Vec::<String>::new()),
//!         ],
//!         Arc::new(Interpreter),
//!     )
//!     .await?;
//!
//!     let answer = engine
//!         .pool()
//!         .with_thread(|thread| async move { thread.get() })
//!         .await?;
//!     assert!(answer > 0);
//!
//!     engine.shutdown().await?;
//!     Ok(())
//! }
//! ```
pub mod config;
mod core;
mod engine;
mod error;
pub mod events;
mod metrics;
pub mod policies;
pub mod pool;
mod runtime;
pub mod subscribers;
pub mod workers;

// ---- Public re-exports ----

pub use config::Config;
pub use core::{Supervisor, WorkerStatus};
pub use engine::Engine;
pub use error::{ConfigError, PoolError, RuntimeError, ScriptError, StartError, ThreadInitError};
pub use events::{Bus, Event, EventKind};
pub use metrics::{Metrics, NullMetrics};
pub use policies::{BackoffPolicy, FailurePolicy, JitterPolicy};
pub use pool::{PoolStats, ThreadGrant, ThreadPool, ThreadState};
pub use runtime::{IniOverrides, ScriptRuntime, ThreadId, WorkerJob};
pub use subscribers::{LogWriter, Subscribe, SubscriberSet};
pub use workers::{PreparedEnv, WatchPattern, WorkerDeclaration};
