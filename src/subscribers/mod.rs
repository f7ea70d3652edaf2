//! # Logging sink: event subscribers.
//!
//! Runtime events broadcast on the [`Bus`](crate::events::Bus) reach the
//! configured logger through a [`SubscriberSet`].
//!
//! ```text
//! Pool / Supervisor ── publish(Event) ──► Bus ──► Engine listener
//!                                                     │
//!                                                     ▼
//!                                              SubscriberSet::emit
//!                                                     │
//!                                       ┌─────────────┴──────────┐
//!                                       ▼                        ▼
//!                                  LogWriter (tracing)      custom Subscribe
//! ```

mod log;
mod set;
mod subscribe;

pub use log::LogWriter;
pub use set::SubscriberSet;
pub use subscribe::Subscribe;
