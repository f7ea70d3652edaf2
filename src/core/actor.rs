//! # WorkerActor: one persistent worker instance.
//!
//! Holds a dedicated pool thread and runs the worker script on it over and
//! over, with policies:
//! - restart on request (file change or administrative) with a bounded grace,
//! - backoff between abnormal terminations per [`BackoffPolicy`],
//! - give-up per [`FailurePolicy`] (fatal for the whole declaration),
//! - cooperative cancellation via the group's [`CancellationToken`].
//!
//! ## Architecture
//! ```text
//! loop {
//!   ├─► thread = first grant | pool.acquire_worker(name)
//!   ├─► publish WorkerStarted
//!   ├─► serve():
//!   │     loop {
//!   │       ├─► restart pending?  → Restart
//!   │       ├─► run_iteration() ─► runtime.run_worker()
//!   │       ├─► Ok                → reset streak, run again
//!   │       ├─► Fail              → WorkerFailed, BackoffScheduled, sleep
//!   │       └─► Fatal | exhausted → WorkerFatal, cancel group → Stop
//!   │     }
//!   ├─► release thread, publish WorkerStopped
//!   └─► Restart → WorkerRestarted, acquire a fresh thread | Stop → exit
//! }
//! ```
//!
//! ## Rules
//! - Iterations run **sequentially** within one instance (never parallel).
//! - Iteration counter is monotonic for the instance lifetime.
//! - A thread that cannot be created counts as a failure of the instance.
//! - A `Canceled` result without a restart or shutdown counts as a failure too.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use crate::core::registry::WorkerGroup;
use crate::core::runner::run_iteration;
use crate::error::{PoolError, RuntimeError, ScriptError};
use crate::events::{Bus, Event, EventKind};
use crate::metrics::Metrics;
use crate::policies::{BackoffPolicy, FailurePolicy, FailureTracker};
use crate::pool::{ThreadGrant, ThreadPool};
use crate::runtime::{ScriptRuntime, WorkerJob};

/// Shared parameters for every actor of a supervisor.
#[derive(Clone)]
pub(crate) struct ActorParams {
    pub pool: ThreadPool,
    pub runtime: Arc<dyn ScriptRuntime>,
    pub bus: Bus,
    pub metrics: Arc<dyn Metrics>,
    pub backoff: BackoffPolicy,
    pub failures: FailurePolicy,
    pub restart_grace: Duration,
}

/// Why `serve` gave its thread back.
enum Served {
    Restart,
    Stop,
}

pub(crate) struct WorkerActor {
    group: Arc<WorkerGroup>,
    instance: u32,
    params: ActorParams,
    tracker: FailureTracker,
    iteration: u64,
}

impl WorkerActor {
    pub fn new(group: Arc<WorkerGroup>, instance: u32, params: ActorParams) -> Self {
        let tracker = FailureTracker::new(params.failures);
        Self {
            group,
            instance,
            params,
            tracker,
            iteration: 0,
        }
    }

    /// Runs the instance until shutdown or the group turns fatal.
    ///
    /// `first` is the thread acquired during supervisor start.
    pub async fn run(mut self, first: ThreadGrant, mut restarts: watch::Receiver<u64>) {
        let token = self.group.token().clone();
        let mut next = Some(first);
        self.group.instance_started();

        loop {
            let grant = match next.take() {
                Some(grant) => grant,
                None => match self.acquire(&token).await {
                    Some(grant) => grant,
                    None => break,
                },
            };

            self.publish(EventKind::WorkerStarted, |ev| ev.with_thread(grant.thread()));
            self.params.metrics.worker_started(self.group.name());

            let served = self.serve(&grant, &token, &mut restarts).await;

            let thread = grant.thread();
            let _ = grant.release();
            self.publish(EventKind::WorkerStopped, |ev| ev.with_thread(thread));
            self.params.metrics.worker_stopped(self.group.name());

            match served {
                Served::Restart => {
                    self.group.restart_began();
                    next = self.acquire(&token).await;
                    self.group.restart_ended();
                    if next.is_none() {
                        break;
                    }
                    self.publish(EventKind::WorkerRestarted, |ev| ev);
                    self.params.metrics.worker_restarted(self.group.name());
                }
                Served::Stop => break,
            }
        }
        self.group.instance_exited();
    }

    /// Iterates the script on `grant` until a restart or stop is due.
    async fn serve(
        &mut self,
        grant: &ThreadGrant,
        token: &CancellationToken,
        restarts: &mut watch::Receiver<u64>,
    ) -> Served {
        let decl = Arc::clone(self.group.decl());

        loop {
            if token.is_cancelled() {
                return Served::Stop;
            }
            if restarts.has_changed().unwrap_or(false) {
                restarts.borrow_and_update();
                return Served::Restart;
            }

            self.iteration += 1;
            let job = WorkerJob {
                worker: decl.name(),
                instance: self.instance,
                script: decl.script(),
                env: decl.env(),
                iteration: self.iteration,
            };

            let began = grant.begin();
            debug_assert!(began.is_ok(), "worker thread lost its reservation: {began:?}");
            let it = run_iteration(
                self.params.runtime.as_ref(),
                grant.thread(),
                &job,
                token,
                restarts,
                self.params.restart_grace,
            )
            .await;
            let finished = grant.finish();
            debug_assert!(finished.is_ok(), "worker thread lost its reservation: {finished:?}");

            if it.restart {
                return Served::Restart;
            }
            match it.result {
                Ok(()) => {
                    self.tracker.reset();
                    tokio::task::yield_now().await;
                }
                Err(ScriptError::Canceled) if token.is_cancelled() => return Served::Stop,
                // Nobody asked for it: counts as an abnormal termination.
                Err(ScriptError::Canceled) => {
                    if !self
                        .on_failure(token, "script cancelled without a request".to_string(), true)
                        .await
                    {
                        return Served::Stop;
                    }
                }
                Err(e) => {
                    let retryable = e.is_retryable();
                    if !self.on_failure(token, e.to_string(), retryable).await {
                        return Served::Stop;
                    }
                }
            }
        }
    }

    /// Creates a fresh thread for this instance, retrying with backoff.
    async fn acquire(&mut self, token: &CancellationToken) -> Option<ThreadGrant> {
        loop {
            let res = tokio::select! {
                res = self.params.pool.acquire_worker(self.group.decl().shared_name()) => res,
                _ = token.cancelled() => return None,
            };
            match res {
                Ok(grant) => return Some(grant),
                Err(PoolError::Closed) => return None,
                Err(e) => {
                    if !self.on_failure(token, e.to_string(), true).await {
                        return None;
                    }
                }
            }
        }
    }

    /// Records an abnormal termination; returns `false` when the instance must stop.
    async fn on_failure(&mut self, token: &CancellationToken, reason: String, retryable: bool) -> bool {
        let name = self.group.name().to_string();
        let streak = self.tracker.record(Instant::now());
        self.params.metrics.worker_failed(&name);
        let iteration = self.iteration;
        self.publish(EventKind::WorkerFailed, |ev| {
            ev.with_iteration(iteration)
                .with_count(u64::from(streak))
                .with_reason(reason.as_str())
        });

        if !retryable || self.tracker.exhausted() {
            let fatal = RuntimeError::WorkerFatal {
                worker: name,
                failures: streak,
                error: reason.clone(),
            };
            if self.group.mark_fatal(fatal) {
                self.publish(EventKind::WorkerFatal, |ev| {
                    ev.with_count(u64::from(streak)).with_reason(reason.as_str())
                });
            }
            return false;
        }

        let delay = self.params.backoff.next(streak.saturating_sub(1));
        self.publish(EventKind::BackoffScheduled, |ev| {
            ev.with_delay(delay)
                .with_count(u64::from(streak))
                .with_reason(reason.as_str())
        });

        tokio::select! {
            _ = time::sleep(delay) => true,
            _ = token.cancelled() => false,
        }
    }

    fn publish(&self, kind: EventKind, extra: impl FnOnce(Event) -> Event) {
        let ev = Event::new(kind)
            .with_worker(self.group.decl().shared_name())
            .with_instance(self.instance);
        self.params.bus.publish(extra(ev));
    }
}
