//! # Event bus for broadcasting runtime events.
//!
//! [`Bus`] is a thin wrapper around [`tokio::sync::broadcast`]; the pool,
//! the supervisor, worker actors and the change coalescer all publish to it.
//!
//! ## Architecture
//! ```text
//! Publishers (many):                       Receivers:
//!   ThreadPool ────┐
//!   WorkerActor ───┼────► Bus ───┬──► Engine listener ──► SubscriberSet (logger)
//!   Coalescer ─────┤              └──► Supervisor alive listener ──► AliveTracker
//!   Supervisor ────┘
//! ```
//!
//! ## Rules
//! - `publish()` never blocks; events are dropped when nobody is subscribed.
//! - The ring buffer is shared; slow receivers observe `RecvError::Lagged(n)`.

use tokio::sync::broadcast;

use super::event::Event;

/// Broadcast channel for runtime events. Cheap to clone.
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
}

impl Bus {
    /// Creates a new bus with the given channel capacity (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel::<Event>(capacity.max(1));
        Self { tx }
    }

    /// Publishes an event to all active receivers.
    pub fn publish(&self, ev: Event) {
        let _ = self.tx.send(ev);
    }

    /// Creates a receiver observing events sent after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}
