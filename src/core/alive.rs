//! # Instance liveness tracker with sequence-based ordering.
//!
//! Maintains which worker instances currently hold a thread, keyed by
//! `"<worker>#<instance>"`, using event sequence numbers to handle
//! out-of-order delivery.
//!
//! ```text
//! WorkerActor ──► Bus ──► alive listener ──► AliveTracker::update()
//!                                                   │
//!                                                   ▼
//!                                   HashMap<String, InstanceState>
//!                                       (label → {seq, alive})
//! ```
//!
//! ## Rules
//! - Only `WorkerStarted` / `WorkerStopped` change alive state
//! - Events with `seq <= last_seq` are **rejected** (stale)
//! - Reads are eventually consistent with the bus

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::events::{Event, EventKind};

#[derive(Debug, Clone, Copy)]
struct InstanceState {
    last_seq: u64,
    alive: bool,
}

/// Thread-safe tracker of instances holding a thread.
///
/// Used by the supervisor to name stuck instances when shutdown exceeds its grace.
#[derive(Debug, Default)]
pub(crate) struct AliveTracker {
    state: RwLock<HashMap<String, InstanceState>>,
}

impl AliveTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies `ev` if it is newer than the last event seen for its instance.
    ///
    /// Returns `true` when the alive state changed.
    pub fn update(&self, ev: &Event) -> bool {
        let alive = match ev.kind {
            EventKind::WorkerStarted => true,
            EventKind::WorkerStopped => false,
            _ => return false,
        };
        let Some(label) = ev.instance_label() else {
            return false;
        };

        let mut state = self.state.write();
        let entry = state.entry(label).or_insert(InstanceState {
            last_seq: 0,
            alive: false,
        });
        if ev.seq <= entry.last_seq {
            return false;
        }
        entry.last_seq = ev.seq;
        let changed = entry.alive != alive;
        entry.alive = alive;
        changed
    }

    /// Sorted labels of instances currently alive.
    pub fn snapshot(&self) -> Vec<String> {
        let state = self.state.read();
        let mut alive: Vec<String> = state
            .iter()
            .filter(|(_, st)| st.alive)
            .map(|(label, _)| label.clone())
            .collect();
        alive.sort_unstable();
        alive
    }
}
