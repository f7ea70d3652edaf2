//! Worker supervision: persistent instances, restarts and shutdown.
//!
//! The only public API from this module is [`Supervisor`] and the
//! [`WorkerStatus`] it reports.
//!
//! Internal modules:
//! - [`runner`]: runs one worker iteration with restart grace and cancellation;
//! - [`actor`]: runs a single instance with backoff and give-up policy;
//! - [`registry`]: per-declaration state (tokens, restart generation, fatal error);
//! - [`watcher`]: OS file watches and restart coalescing;
//! - [`alive`]: instances currently holding a thread;
//! - [`shutdown`]: cross-platform termination signals.

mod actor;
mod alive;
mod registry;
mod runner;
pub(crate) mod shutdown;
mod supervisor;
mod watcher;

pub use registry::WorkerStatus;
pub use supervisor::Supervisor;
