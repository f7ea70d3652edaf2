//! Shared fixtures: a scriptable interpreter runtime and a recording metrics sink.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use scriptvisor::{
    IniOverrides, Metrics, ScriptError, ScriptRuntime, ThreadId, ThreadInitError, WorkerJob,
};

/// How a worker script behaves on each iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Runs until cancelled, then reports `Canceled`.
    Block,
    /// Completes normally after the given time.
    Complete(Duration),
    /// Fails after the given time.
    Fail(Duration),
    /// Fails fatally at once.
    Fatal,
    /// Ignores cancellation and sleeps for an hour.
    Stubborn,
    /// Reports `Canceled` after the given time although nobody cancelled it.
    SelfCancel(Duration),
}

/// Interpreter stand-in. Scripts never spin without sleeping.
#[derive(Default)]
pub struct MockRuntime {
    modes: Mutex<HashMap<String, Mode>>,
    runs: Mutex<HashMap<String, usize>>,
    fail_inits: AtomicUsize,
    init_delay: Mutex<Duration>,
    threads: Mutex<HashMap<String, ThreadId>>,
    pub inits: AtomicUsize,
    pub shutdowns: AtomicUsize,
    pub last_ini: Mutex<IniOverrides>,
    pub last_env: Mutex<HashMap<String, Vec<(String, String)>>>,
}

impl MockRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_mode(&self, worker: &str, mode: Mode) {
        self.modes.lock().insert(worker.to_string(), mode);
    }

    /// The next `n` `init_thread` calls fail.
    pub fn fail_next_inits(&self, n: usize) {
        self.fail_inits.store(n, Ordering::SeqCst);
    }

    /// Every later `init_thread` call takes `delay` before it answers.
    pub fn set_init_delay(&self, delay: Duration) {
        *self.init_delay.lock() = delay;
    }

    /// Thread the latest iteration of `worker` ran on.
    pub fn thread_of(&self, worker: &str) -> Option<ThreadId> {
        self.threads.lock().get(worker).copied()
    }

    /// Iterations started for `worker`.
    pub fn runs(&self, worker: &str) -> usize {
        self.runs.lock().get(worker).copied().unwrap_or(0)
    }

    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScriptRuntime for MockRuntime {
    async fn init_thread(&self, thread: ThreadId, ini: &IniOverrides) -> Result<(), ThreadInitError> {
        self.inits.fetch_add(1, Ordering::SeqCst);
        *self.last_ini.lock() = ini.clone();
        let delay = *self.init_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let failing = self
            .fail_inits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ThreadInitError::new(format!("cannot start {thread}")));
        }
        Ok(())
    }

    async fn run_worker(
        &self,
        thread: ThreadId,
        job: &WorkerJob<'_>,
        ctx: CancellationToken,
    ) -> Result<(), ScriptError> {
        self.threads.lock().insert(job.worker.to_string(), thread);
        *self.runs.lock().entry(job.worker.to_string()).or_default() += 1;
        self.last_env.lock().insert(
            job.worker.to_string(),
            job.env
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
        let mode = self
            .modes
            .lock()
            .get(job.worker)
            .copied()
            .unwrap_or(Mode::Block);

        match mode {
            Mode::Block => {
                ctx.cancelled().await;
                Err(ScriptError::Canceled)
            }
            Mode::Complete(d) => {
                tokio::select! {
                    _ = tokio::time::sleep(d) => Ok(()),
                    _ = ctx.cancelled() => Err(ScriptError::Canceled),
                }
            }
            Mode::Fail(d) => {
                tokio::select! {
                    _ = tokio::time::sleep(d) => Err(ScriptError::Fail { error: "uncaught exception".into() }),
                    _ = ctx.cancelled() => Err(ScriptError::Canceled),
                }
            }
            Mode::Fatal => Err(ScriptError::Fatal {
                error: "script not found".into(),
            }),
            Mode::Stubborn => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }
            Mode::SelfCancel(d) => {
                tokio::select! {
                    _ = tokio::time::sleep(d) => {}
                    _ = ctx.cancelled() => {}
                }
                Err(ScriptError::Canceled)
            }
        }
    }

    fn shutdown_thread(&self, _thread: ThreadId) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

/// Metrics sink counting every call.
#[derive(Default)]
pub struct RecordingMetrics {
    pub rejected: AtomicUsize,
    pub queued: AtomicUsize,
    pub dequeued: AtomicUsize,
    pub started: AtomicUsize,
    pub stopped: AtomicUsize,
    pub restarted: AtomicUsize,
    pub failed: AtomicUsize,
    pub idle: AtomicUsize,
}

impl RecordingMetrics {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

impl Metrics for RecordingMetrics {
    fn idle_threads(&self, count: usize) {
        self.idle.store(count, Ordering::SeqCst);
    }

    fn rejected_acquire(&self) {
        self.rejected.fetch_add(1, Ordering::SeqCst);
    }

    fn queued_request(&self) {
        self.queued.fetch_add(1, Ordering::SeqCst);
    }

    fn dequeued_request(&self) {
        self.dequeued.fetch_add(1, Ordering::SeqCst);
    }

    fn worker_started(&self, _worker: &str) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }

    fn worker_stopped(&self, _worker: &str) {
        self.stopped.fetch_add(1, Ordering::SeqCst);
    }

    fn worker_restarted(&self, _worker: &str) {
        self.restarted.fetch_add(1, Ordering::SeqCst);
    }

    fn worker_failed(&self, _worker: &str) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }
}
