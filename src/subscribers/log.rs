//! # Default logging sink.
//!
//! [`LogWriter`] turns runtime events into structured [`tracing`] records. The
//! host chooses the output format by installing any `tracing` subscriber; with
//! none installed the records are discarded.
//!
//! ## Levels
//! - `error`: `ThreadStartFailed`, `WorkerFatal`, `GraceExceeded`, `SubscriberPanicked`
//! - `warn`: `PoolExhausted`, `WorkerFailed`, `BackoffScheduled`, `WatchFailed`, `SubscriberOverflow`
//! - `info`: worker lifecycle, restarts, resize, shutdown
//! - `debug`: per-thread start/stop

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Structured `tracing` logger; the default `Config::logger`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogWriter;

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let worker = e.worker.as_deref().unwrap_or("");
        let reason = e.reason.as_deref().unwrap_or("");
        let thread = e.thread.map(|t| t.get());
        let path = e.path.as_deref().map(|p| p.display().to_string());

        match e.kind {
            EventKind::ThreadStarted => {
                debug!(seq = e.seq, ?thread, worker, "thread started");
            }
            EventKind::ThreadStartFailed => {
                error!(seq = e.seq, ?thread, worker, reason, "thread initialization failed");
            }
            EventKind::ThreadTerminated => {
                debug!(seq = e.seq, ?thread, worker, "thread terminated");
            }
            EventKind::PoolExhausted => {
                warn!(
                    seq = e.seq,
                    waited_ms = e.delay_ms,
                    rejected = e.count,
                    "no thread available, request rejected"
                );
            }
            EventKind::PoolResized => {
                info!(seq = e.seq, ceiling = e.count, "thread pool resized");
            }
            EventKind::PoolClosed => {
                info!(seq = e.seq, "thread pool closed");
            }
            EventKind::WorkerStarted => {
                info!(seq = e.seq, worker, instance = e.instance, ?thread, "worker started");
            }
            EventKind::WorkerStopped => {
                info!(seq = e.seq, worker, instance = e.instance, ?thread, "worker stopped");
            }
            EventKind::WorkerFailed => {
                warn!(
                    seq = e.seq,
                    worker,
                    instance = e.instance,
                    iteration = e.iteration,
                    streak = e.count,
                    reason,
                    "worker script failed"
                );
            }
            EventKind::BackoffScheduled => {
                warn!(
                    seq = e.seq,
                    worker,
                    instance = e.instance,
                    delay_ms = e.delay_ms,
                    streak = e.count,
                    "worker restart delayed"
                );
            }
            EventKind::WorkerRestartScheduled => {
                info!(seq = e.seq, worker, ?path, "worker restart scheduled");
            }
            EventKind::WorkerRestarted => {
                info!(seq = e.seq, worker, instance = e.instance, "worker restarted");
            }
            EventKind::WorkerFatal => {
                error!(
                    seq = e.seq,
                    worker,
                    instance = e.instance,
                    failures = e.count,
                    reason,
                    "worker gave up, all instances stopped"
                );
            }
            EventKind::WatchFailed => {
                warn!(seq = e.seq, ?path, reason, "file watch failed");
            }
            EventKind::ShutdownRequested => {
                info!(seq = e.seq, "shutdown requested");
            }
            EventKind::AllStoppedWithin => {
                info!(seq = e.seq, "all workers stopped within grace");
            }
            EventKind::GraceExceeded => {
                error!(seq = e.seq, stuck = reason, "shutdown grace exceeded");
            }
            EventKind::SubscriberOverflow => {
                warn!(seq = e.seq, subscriber = worker, reason, "subscriber dropped event");
            }
            EventKind::SubscriberPanicked => {
                error!(seq = e.seq, subscriber = worker, reason, "subscriber panicked");
            }
        }
    }

    fn name(&self) -> &'static str {
        "log-writer"
    }
}
