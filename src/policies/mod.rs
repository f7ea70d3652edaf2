//! Worker restart policies.
//!
//! This module groups the knobs that control **how long** a crashed worker
//! instance waits before running again and **when** the supervisor gives up.
//!
//! ## Contents
//! - [`BackoffPolicy`] how restart delays evolve (first / factor / max + jitter)
//! - [`JitterPolicy`]  randomization so instances do not restart in lockstep
//! - [`FailurePolicy`] rapid consecutive failures tolerated before `WorkerFatal`
//!
//! ## Quick wiring
//! ```text
//! Config { worker_backoff, worker_failures }
//!      └─► core::actor::WorkerActor uses:
//!           - worker_failures to count the streak and give up
//!           - worker_backoff.next(streak - 1) to delay the next iteration
//! ```

mod backoff;
mod failure;
mod jitter;

pub use backoff::BackoffPolicy;
pub use failure::FailurePolicy;
pub use jitter::JitterPolicy;

pub(crate) use failure::FailureTracker;
