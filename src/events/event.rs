//! # Runtime events emitted by the pool and the worker supervisor.
//!
//! [`EventKind`] classifies events in four groups:
//! - **Pool events**: thread start/stop, admission rejection, resize
//! - **Worker events**: instance lifecycle, failures, restarts, fatal give-up
//! - **Shutdown events**: signal observed, grace outcome
//! - **Subscriber events**: overflow and panics of the logging fan-out
//!
//! [`Event`] carries optional metadata (worker, instance, thread, reason, ...).
//!
//! ## Ordering guarantees
//! Each event has a process-wide sequence number (`seq`) that increases
//! monotonically; use it to restore order when events arrive out of order.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use scriptvisor::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::WorkerFailed)
//!     .with_worker("mailer")
//!     .with_instance(1)
//!     .with_reason("uncaught exception")
//!     .with_iteration(3);
//!
//! assert_eq!(ev.kind, EventKind::WorkerFailed);
//! assert_eq!(ev.worker.as_deref(), Some("mailer"));
//! assert_eq!(ev.instance_label().as_deref(), Some("mailer#1"));
//! ```

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

use crate::runtime::ThreadId;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(1);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    // === Pool events ===
    /// A thread finished initializing against the interpreter runtime.
    ///
    /// Sets: `thread`, `worker` (for worker threads).
    ThreadStarted,

    /// The runtime failed to initialize a thread.
    ///
    /// Sets: `thread`, `reason`, `worker` (for worker threads).
    ThreadStartFailed,

    /// A thread was torn down (shrink toward the floor, worker release, close).
    ///
    /// Sets: `thread`, `worker` (for worker threads).
    ThreadTerminated,

    /// An `acquire` call was rejected by admission control.
    ///
    /// Sets: `delay_ms` (time waited), `count` (total rejections so far).
    PoolExhausted,

    /// The thread ceiling changed.
    ///
    /// Sets: `count` (new effective ceiling).
    PoolResized,

    /// The pool stopped granting threads.
    PoolClosed,

    // === Worker events ===
    /// A worker instance obtained a thread and is about to run its script.
    ///
    /// Sets: `worker`, `instance`, `thread`.
    WorkerStarted,

    /// A worker instance released its thread (restart, shutdown or fatal).
    ///
    /// Sets: `worker`, `instance`, `thread`.
    WorkerStopped,

    /// A script iteration terminated abnormally.
    ///
    /// Sets: `worker`, `instance`, `iteration`, `reason`, `count` (streak length).
    WorkerFailed,

    /// Next iteration delayed after an abnormal termination.
    ///
    /// Sets: `worker`, `instance`, `delay_ms`, `count` (streak length), `reason`.
    BackoffScheduled,

    /// A restart of every instance of a worker was scheduled.
    ///
    /// Sets: `worker`, `path` (first change that triggered it, if any).
    WorkerRestartScheduled,

    /// A worker instance finished its graceful restart and will acquire a fresh thread.
    ///
    /// Sets: `worker`, `instance`.
    WorkerRestarted,

    /// A worker exceeded its failure threshold; all its instances stop.
    ///
    /// Sets: `worker`, `instance`, `count` (streak length), `reason`.
    WorkerFatal,

    /// A watch could not be registered or the watcher reported an error.
    ///
    /// Sets: `path` (if known), `reason`.
    WatchFailed,

    // === Shutdown events ===
    /// Shutdown requested (OS signal or explicit call).
    ShutdownRequested,

    /// All worker instances stopped within the grace period.
    AllStoppedWithin,

    /// Grace period exceeded; some instances did not stop in time.
    GraceExceeded,

    // === Subscriber events ===
    /// A subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets: `worker` (subscriber name), `reason`.
    SubscriberOverflow,

    /// A subscriber panicked while handling an event.
    ///
    /// Sets: `worker` (subscriber name), `reason` (panic message).
    SubscriberPanicked,
}

/// Runtime event with optional metadata.
#[derive(Debug, Clone)]
pub struct Event {
    /// Monotonic sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Worker declaration name (or subscriber name for subscriber events).
    pub worker: Option<Arc<str>>,
    /// Worker instance index.
    pub instance: Option<u32>,
    /// Execution thread involved.
    pub thread: Option<ThreadId>,
    /// Iteration number of the instance.
    pub iteration: Option<u64>,
    /// Delay in milliseconds (backoff, admission wait).
    pub delay_ms: Option<u32>,
    /// Counter payload (streak length, rejections, ceiling).
    pub count: Option<u64>,
    /// Filesystem path that triggered the event.
    pub path: Option<Arc<Path>>,
    /// Human-readable reason.
    pub reason: Option<Arc<str>>,
}

impl Event {
    /// Creates an event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            worker: None,
            instance: None,
            thread: None,
            iteration: None,
            delay_ms: None,
            count: None,
            path: None,
            reason: None,
        }
    }

    #[inline]
    pub fn with_worker(mut self, worker: impl Into<Arc<str>>) -> Self {
        self.worker = Some(worker.into());
        self
    }

    #[inline]
    pub fn with_instance(mut self, instance: u32) -> Self {
        self.instance = Some(instance);
        self
    }

    #[inline]
    pub fn with_thread(mut self, thread: ThreadId) -> Self {
        self.thread = Some(thread);
        self
    }

    #[inline]
    pub fn with_iteration(mut self, iteration: u64) -> Self {
        self.iteration = Some(iteration);
        self
    }

    /// Attaches a delay (stored as milliseconds, saturating).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay_ms = Some(d.as_millis().min(u128::from(u32::MAX)) as u32);
        self
    }

    #[inline]
    pub fn with_count(mut self, count: u64) -> Self {
        self.count = Some(count);
        self
    }

    #[inline]
    pub fn with_path(mut self, path: &Path) -> Self {
        self.path = Some(Arc::from(path));
        self
    }

    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// `"<worker>#<instance>"` when both are set.
    pub fn instance_label(&self) -> Option<String> {
        match (&self.worker, self.instance) {
            (Some(w), Some(i)) => Some(format!("{w}#{i}")),
            _ => None,
        }
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_worker(subscriber)
            .with_reason(reason)
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_worker(subscriber)
            .with_reason(info)
    }
}
