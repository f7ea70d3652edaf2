//! # Metrics sink boundary.
//!
//! The host injects a [`Metrics`] implementation with
//! [`with_metrics`](crate::config::with_metrics). The core only calls the
//! methods below; the schema (names, labels, exporters) belongs to the sink.
//!
//! Gauges are reported after every pool state change, outside the pool lock.

/// Contract for metrics sinks. Every method defaults to a no-op.
pub trait Metrics: Send + Sync + 'static {
    /// Current number of idle request threads.
    fn idle_threads(&self, _count: usize) {}

    /// Current number of request threads reserved or executing.
    fn reserved_threads(&self, _count: usize) {}

    /// Current number of threads held by worker instances.
    fn worker_threads(&self, _count: usize) {}

    /// An `acquire` call was rejected by admission control.
    fn rejected_acquire(&self) {}

    /// A caller started waiting for a thread.
    fn queued_request(&self) {}

    /// A waiting caller left the queue (served, timed out or cancelled).
    fn dequeued_request(&self) {}

    /// A worker instance obtained its thread and started.
    fn worker_started(&self, _worker: &str) {}

    /// A worker instance released its thread.
    fn worker_stopped(&self, _worker: &str) {}

    /// A worker instance was restarted after a file change or an explicit request.
    fn worker_restarted(&self, _worker: &str) {}

    /// A worker iteration terminated abnormally.
    fn worker_failed(&self, _worker: &str) {}
}

/// Metrics sink that discards everything (default).
#[derive(Debug, Default, Clone, Copy)]
pub struct NullMetrics;

impl Metrics for NullMetrics {}
