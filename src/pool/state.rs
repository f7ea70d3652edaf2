//! # Pool bookkeeping.
//!
//! [`PoolState`] is the single source of truth for every live thread, the FIFO
//! of waiting acquirers and the floor/ceiling counters. It is plain data behind
//! one `parking_lot::Mutex`; every method is synchronous and never touches the
//! interpreter runtime, the bus or metrics. Callers collect an outcome under the
//! lock and perform side effects after releasing it.
//!
//! ## Thread states
//! ```text
//! Idle ──► Reserved ──► Executing ──► Idle        (returned, request threads)
//!              ▲            │
//!              └─ finish() ─┘         ──► Terminated (removed from the map)
//! ```
//!
//! ## Counting rules
//! - `requests` counts live request threads; worker threads never count
//!   against `floor` or `ceiling`.
//! - `requests + growing <= ceiling` is checked before any growth.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::oneshot;

use crate::runtime::ThreadId;

/// Lifecycle state of a live thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Initialized and free for the next request.
    Idle,
    /// Granted to a caller, not running anything yet.
    Reserved,
    /// Running a request or a worker iteration.
    Executing,
}

/// Who the thread belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SlotKind {
    Request,
    Worker(Arc<str>),
}

#[derive(Debug)]
pub(crate) struct Slot {
    pub state: ThreadState,
    pub kind: SlotKind,
}

/// A caller parked in the FIFO until a thread is handed over.
#[derive(Debug)]
pub(crate) struct Waiter {
    pub id: u64,
    pub tx: oneshot::Sender<ThreadId>,
}

/// Point-in-time counters of the pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Request threads ready for the next request.
    pub idle: usize,
    /// Request threads granted to a caller (reserved or executing).
    pub reserved: usize,
    /// Threads permanently reserved by worker instances.
    pub workers: usize,
    /// Request threads currently initializing.
    pub growing: usize,
    /// Callers waiting in the admission queue.
    pub waiting: usize,
    /// Total `acquire` calls rejected so far.
    pub rejected: u64,
    /// Warm floor (`num_threads`).
    pub floor: usize,
    /// Current request ceiling.
    pub ceiling: usize,
}

/// Gauge values reported to the metrics sink after a state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Gauges {
    pub idle: usize,
    pub reserved: usize,
    pub workers: usize,
}

/// Result of admission under the lock.
#[derive(Debug)]
pub(crate) enum Admit {
    /// An idle thread was reserved for the caller.
    Granted(ThreadId),
    /// Caller must initialize a new thread (`growing` already counted).
    Grow(ThreadId),
    /// Caller was queued.
    Wait(u64, oneshot::Receiver<ThreadId>),
    /// No capacity and the caller does not wait.
    Reject,
    Closed,
}

/// What to do with a thread leaving a caller's hands.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Returned {
    /// Handed to the longest waiter (stays reserved).
    HandedOff,
    /// Back in the idle list.
    Idle,
    /// Removed from the pool; must be shut down in the runtime.
    Terminate(Option<Arc<str>>),
}

#[derive(Debug)]
pub(crate) struct PoolState {
    pub idle: VecDeque<ThreadId>,
    pub threads: HashMap<ThreadId, Slot>,
    pub waiters: VecDeque<Waiter>,
    pub requests: usize,
    pub growing: usize,
    pub floor: usize,
    pub ceiling: usize,
    pub rejected: u64,
    pub closed: bool,
    next_waiter: u64,
}

impl PoolState {
    pub fn new(floor: usize, ceiling: usize) -> Self {
        Self {
            idle: VecDeque::with_capacity(floor),
            threads: HashMap::with_capacity(ceiling),
            waiters: VecDeque::new(),
            requests: 0,
            growing: 0,
            floor,
            ceiling: ceiling.max(floor),
            rejected: 0,
            closed: false,
            next_waiter: 1,
        }
    }

    /// Registers an initialized request thread as idle.
    pub fn insert_idle(&mut self, thread: ThreadId) {
        self.threads.insert(
            thread,
            Slot {
                state: ThreadState::Idle,
                kind: SlotKind::Request,
            },
        );
        self.requests += 1;
        self.idle.push_back(thread);
    }

    /// Registers an initialized thread as reserved by its creator.
    pub fn insert_reserved(&mut self, thread: ThreadId, kind: SlotKind) {
        if kind == SlotKind::Request {
            self.requests += 1;
        }
        self.threads.insert(
            thread,
            Slot {
                state: ThreadState::Reserved,
                kind,
            },
        );
    }

    /// True when one more request thread may be created.
    pub fn can_grow(&self) -> bool {
        self.requests + self.growing < self.ceiling
    }

    /// Admission decision for a caller willing to wait (`may_wait`).
    ///
    /// `next_thread` is consulted only when the pool grows.
    pub fn admit(&mut self, may_wait: bool, next_thread: impl FnOnce() -> ThreadId) -> Admit {
        if self.closed {
            return Admit::Closed;
        }
        if let Some(thread) = self.idle.pop_front() {
            if let Some(slot) = self.threads.get_mut(&thread) {
                slot.state = ThreadState::Reserved;
            }
            return Admit::Granted(thread);
        }
        if self.can_grow() {
            self.growing += 1;
            return Admit::Grow(next_thread());
        }
        if !may_wait {
            self.rejected += 1;
            return Admit::Reject;
        }
        let id = self.next_waiter;
        self.next_waiter += 1;
        let (tx, rx) = oneshot::channel();
        self.waiters.push_back(Waiter { id, tx });
        Admit::Wait(id, rx)
    }

    /// Removes a waiter still in the queue; `false` if it was already served.
    pub fn remove_waiter(&mut self, id: u64) -> bool {
        match self.waiters.iter().position(|w| w.id == id) {
            Some(pos) => {
                self.waiters.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Decides the fate of a reserved/executing thread given back by its holder.
    ///
    /// Returns `None` if the thread is unknown or idle.
    pub fn give_back(&mut self, thread: ThreadId) -> Option<Returned> {
        let slot = self.threads.get(&thread)?;
        if slot.state == ThreadState::Idle {
            return None;
        }
        if let SlotKind::Worker(name) = &slot.kind {
            let name = Arc::clone(name);
            self.threads.remove(&thread);
            return Some(Returned::Terminate(Some(name)));
        }

        if self.closed || self.requests > self.ceiling {
            return Some(self.terminate_request(thread));
        }
        while let Some(waiter) = self.waiters.pop_front() {
            // A dropped receiver means the waiter left between timeout and cleanup.
            if waiter.tx.send(thread).is_ok() {
                if let Some(slot) = self.threads.get_mut(&thread) {
                    slot.state = ThreadState::Reserved;
                }
                return Some(Returned::HandedOff);
            }
        }
        if self.requests > self.floor {
            return Some(self.terminate_request(thread));
        }
        if let Some(slot) = self.threads.get_mut(&thread) {
            slot.state = ThreadState::Idle;
        }
        self.idle.push_back(thread);
        Some(Returned::Idle)
    }

    fn terminate_request(&mut self, thread: ThreadId) -> Returned {
        self.threads.remove(&thread);
        self.requests -= 1;
        Returned::Terminate(None)
    }

    /// Moves a reserved thread to `to`; `false` if it is not held by a caller.
    pub fn transition(&mut self, thread: ThreadId, to: ThreadState) -> bool {
        match self.threads.get_mut(&thread) {
            Some(slot) if slot.state != ThreadState::Idle => {
                slot.state = to;
                true
            }
            _ => false,
        }
    }

    /// Drops idle request threads above the ceiling after a shrink.
    pub fn shrink_idle(&mut self) -> Vec<ThreadId> {
        let mut surplus = Vec::new();
        while self.requests > self.ceiling {
            let Some(thread) = self.idle.pop_back() else {
                break;
            };
            self.terminate_request(thread);
            surplus.push(thread);
        }
        surplus
    }

    /// Marks the pool closed, dropping every waiter and every idle thread.
    ///
    /// Returns the idle threads to shut down.
    pub fn close(&mut self) -> Vec<ThreadId> {
        self.closed = true;
        self.waiters.clear();
        let idle: Vec<ThreadId> = self.idle.drain(..).collect();
        for thread in &idle {
            self.threads.remove(thread);
        }
        self.requests -= idle.len();
        idle
    }

    pub fn gauges(&self) -> Gauges {
        let workers = self.worker_count(None);
        Gauges {
            idle: self.idle.len(),
            reserved: self.requests - self.idle.len(),
            workers,
        }
    }

    /// Threads held by workers, optionally filtered by name.
    pub fn worker_count(&self, name: Option<&str>) -> usize {
        self.threads
            .values()
            .filter(|slot| match (&slot.kind, name) {
                (SlotKind::Worker(_), None) => true,
                (SlotKind::Worker(w), Some(n)) => &**w == n,
                (SlotKind::Request, _) => false,
            })
            .count()
    }

    pub fn stats(&self) -> PoolStats {
        let g = self.gauges();
        PoolStats {
            idle: g.idle,
            reserved: g.reserved,
            workers: g.workers,
            growing: self.growing,
            waiting: self.waiters.len(),
            rejected: self.rejected,
            floor: self.floor,
            ceiling: self.ceiling,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with_idle(floor: usize, ceiling: usize) -> PoolState {
        let mut st = PoolState::new(floor, ceiling);
        for i in 1..=floor as u64 {
            st.insert_idle(ThreadId(i));
        }
        st
    }

    #[test]
    fn test_idle_then_grow_then_reject() {
        let mut st = state_with_idle(1, 2);
        assert!(matches!(st.admit(false, || ThreadId(9)), Admit::Granted(ThreadId(1))));
        assert!(matches!(st.admit(false, || ThreadId(2)), Admit::Grow(ThreadId(2))));
        assert!(matches!(st.admit(false, || ThreadId(3)), Admit::Reject));
        assert_eq!(st.rejected, 1);
        assert_eq!(st.growing, 1);
    }

    #[test]
    fn test_waiters_served_in_order() {
        let mut st = state_with_idle(1, 1);
        let Admit::Granted(t) = st.admit(true, || ThreadId(0)) else {
            panic!("expected grant");
        };
        let Admit::Wait(_, mut first) = st.admit(true, || ThreadId(0)) else {
            panic!("expected wait");
        };
        let Admit::Wait(_, mut second) = st.admit(true, || ThreadId(0)) else {
            panic!("expected wait");
        };

        assert_eq!(st.give_back(t), Some(Returned::HandedOff));
        assert_eq!(first.try_recv().ok(), Some(t));
        assert!(second.try_recv().is_err());
        assert_eq!(st.waiters.len(), 1);
    }

    #[test]
    fn test_skips_abandoned_waiter() {
        let mut st = state_with_idle(1, 1);
        let Admit::Granted(t) = st.admit(true, || ThreadId(0)) else {
            panic!("expected grant");
        };
        let Admit::Wait(_, gone) = st.admit(true, || ThreadId(0)) else {
            panic!("expected wait");
        };
        drop(gone);
        assert_eq!(st.give_back(t), Some(Returned::Idle));
        assert_eq!(st.stats().idle, 1);
    }

    #[test]
    fn test_above_floor_terminates() {
        let mut st = state_with_idle(1, 2);
        let Admit::Granted(a) = st.admit(false, || ThreadId(0)) else {
            panic!("expected grant");
        };
        let _ = st.admit(false, || ThreadId(2));
        st.growing -= 1;
        st.insert_reserved(ThreadId(2), SlotKind::Request);

        assert_eq!(st.give_back(a), Some(Returned::Terminate(None)));
        assert_eq!(st.give_back(ThreadId(2)), Some(Returned::Idle));
        assert_eq!(st.requests, 1);
    }

    #[test]
    fn test_worker_threads_do_not_count() {
        let mut st = state_with_idle(1, 1);
        st.insert_reserved(ThreadId(7), SlotKind::Worker(Arc::from("mailer")));
        assert_eq!(st.worker_count(Some("mailer")), 1);
        assert!(matches!(st.admit(false, || ThreadId(8)), Admit::Granted(_)));
        assert_eq!(
            st.give_back(ThreadId(7)),
            Some(Returned::Terminate(Some(Arc::from("mailer"))))
        );
        assert_eq!(st.worker_count(None), 0);
    }

    #[test]
    fn test_idle_thread_cannot_be_given_back() {
        let mut st = state_with_idle(1, 1);
        assert_eq!(st.give_back(ThreadId(1)), None);
        assert_eq!(st.give_back(ThreadId(42)), None);
        assert!(!st.transition(ThreadId(1), ThreadState::Executing));
    }

    #[test]
    fn test_close_drops_waiters_and_idle() {
        let mut st = state_with_idle(2, 2);
        let Admit::Granted(held) = st.admit(true, || ThreadId(0)) else {
            panic!("expected grant");
        };
        let _ = st.admit(true, || ThreadId(0));
        let Admit::Wait(_, mut rx) = st.admit(true, || ThreadId(0)) else {
            panic!("expected wait");
        };
        let idle = st.close();
        assert!(idle.is_empty());
        assert!(rx.try_recv().is_err());
        assert!(matches!(st.admit(true, || ThreadId(0)), Admit::Closed));
        assert_eq!(st.give_back(held), Some(Returned::Terminate(None)));
    }
}
