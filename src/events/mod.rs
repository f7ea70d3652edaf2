//! Runtime events: types and broadcast bus.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `ThreadPool`, `Supervisor`, `WorkerActor`, the change
//!   coalescer, `SubscriberSet` workers (overflow/panic).
//! - **Consumers**: the `Engine` listener (fans out to the logger through
//!   `SubscriberSet`) and the supervisor's alive listener.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
