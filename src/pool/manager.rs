//! # Thread pool manager.
//!
//! [`ThreadPool`] keeps a floor of warm threads, grows toward a ceiling under
//! load and applies admission control when no thread is free.
//!
//! ## Acquire path
//! ```text
//! acquire_timeout(d)
//!   ├─ idle thread?             ──► Reserved, granted at once
//!   ├─ requests + growing < max ──► init_thread() ──► granted (or ThreadInitFailure)
//!   ├─ d == 0                   ──► PoolExhausted (fail fast)
//!   └─ park in FIFO ──timeout(d)──► handed a released thread, or PoolExhausted
//! ```
//!
//! ## Rules
//! - Bookkeeping lives in one `parking_lot::Mutex`, never held across `.await`.
//! - Runtime calls (`init_thread`, `shutdown_thread`), bus publishing and metrics
//!   happen outside the lock.
//! - A released thread goes to the longest waiter first.
//! - Worker threads come from [`ThreadPool::acquire_worker`]; they are not drawn
//!   from the idle list, not counted against the ceiling and terminated on release.
//! - Dropping an `acquire` future leaves no trace: a queued waiter is removed, a
//!   thread handed over concurrently is given back, a half-initialized thread is
//!   shut down.
//! - Headroom reserved by a caller whose growth fails or is dropped goes to the
//!   parked waiters: one growth is started per waiter while below the ceiling.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::time::{self, Instant};

use crate::config::Config;
use crate::error::PoolError;
use crate::events::{Bus, Event, EventKind};
use crate::metrics::Metrics;
use crate::runtime::{IniOverrides, ScriptRuntime, ThreadId};

use super::grant::ThreadGrant;
use super::state::{Admit, Gauges, PoolState, PoolStats, Returned, SlotKind, ThreadState};

pub(crate) struct Shared {
    state: Mutex<PoolState>,
    runtime: Arc<dyn ScriptRuntime>,
    ini: IniOverrides,
    bus: Bus,
    metrics: Arc<dyn Metrics>,
    max_wait: Duration,
    next_thread: AtomicU64,
    handle: Handle,
}

impl Shared {
    fn next_thread(&self) -> ThreadId {
        ThreadId(self.next_thread.fetch_add(1, Ordering::Relaxed))
    }

    fn report(&self, g: Gauges) {
        self.metrics.idle_threads(g.idle);
        self.metrics.reserved_threads(g.reserved);
        self.metrics.worker_threads(g.workers);
    }

    fn terminate(&self, thread: ThreadId, worker: Option<Arc<str>>) {
        self.runtime.shutdown_thread(thread);
        let mut ev = Event::new(EventKind::ThreadTerminated).with_thread(thread);
        if let Some(worker) = worker {
            ev = ev.with_worker(worker);
        }
        self.bus.publish(ev);
    }

    fn started(&self, thread: ThreadId, worker: Option<&Arc<str>>) {
        let mut ev = Event::new(EventKind::ThreadStarted).with_thread(thread);
        if let Some(worker) = worker {
            ev = ev.with_worker(Arc::clone(worker));
        }
        self.bus.publish(ev);
    }

    fn start_failed(&self, thread: ThreadId, worker: Option<&Arc<str>>, reason: &str) {
        let mut ev = Event::new(EventKind::ThreadStartFailed)
            .with_thread(thread)
            .with_reason(reason);
        if let Some(worker) = worker {
            ev = ev.with_worker(Arc::clone(worker));
        }
        self.bus.publish(ev);
    }

    fn reject(&self, waited: Duration, rejected: u64) -> PoolError {
        self.metrics.rejected_acquire();
        self.bus.publish(
            Event::new(EventKind::PoolExhausted)
                .with_delay(waited)
                .with_count(rejected),
        );
        PoolError::PoolExhausted { waited }
    }

    /// Returns a thread held by a grant (or by a cancelled waiter).
    pub(crate) fn release_thread(&self, thread: ThreadId) -> Result<(), PoolError> {
        let (returned, gauges) = {
            let mut st = self.state.lock();
            let returned = st
                .give_back(thread)
                .ok_or(PoolError::NotReserved { thread })?;
            (returned, st.gauges())
        };
        if let Returned::Terminate(worker) = returned {
            self.terminate(thread, worker);
        }
        self.report(gauges);
        Ok(())
    }

    pub(crate) fn transition(&self, thread: ThreadId, to: ThreadState) -> Result<(), PoolError> {
        if self.state.lock().transition(thread, to) {
            Ok(())
        } else {
            Err(PoolError::NotReserved { thread })
        }
    }

    /// Initializes a request thread whose slot was counted in `growing`.
    async fn init_request_thread(self: &Arc<Self>, thread: ThreadId, growth: Growth) -> Result<(), PoolError> {
        let mut guard = InitGuard::new(self, thread, growth);
        let res = self.runtime.init_thread(thread, &self.ini).await;
        guard.disarm();

        let closed = {
            let mut st = self.state.lock();
            st.growing -= 1;
            if res.is_ok() && !st.closed {
                st.insert_reserved(thread, SlotKind::Request);
                false
            } else {
                st.closed
            }
        };

        match res {
            Err(e) => {
                self.start_failed(thread, None, &e.reason);
                if growth == Growth::Caller {
                    self.grow_for_waiters();
                }
                Err(PoolError::ThreadInitFailure {
                    thread,
                    reason: e.reason,
                })
            }
            Ok(()) if closed => {
                self.runtime.shutdown_thread(thread);
                Err(PoolError::Closed)
            }
            Ok(()) => {
                self.started(thread, None);
                Ok(())
            }
        }
    }

    /// Starts one growth per parked waiter while the pool is below its ceiling.
    ///
    /// Each new thread is released straight away, which hands it to the
    /// longest waiter.
    fn grow_for_waiters(self: &Arc<Self>) {
        let threads = {
            let mut st = self.state.lock();
            let mut threads = Vec::new();
            while threads.len() < st.waiters.len() && st.can_grow() {
                st.growing += 1;
                threads.push(self.next_thread());
            }
            threads
        };
        for thread in threads {
            let shared = Arc::clone(self);
            self.handle.spawn(async move {
                if shared.init_request_thread(thread, Growth::Waiters).await.is_ok() {
                    let _ = shared.release_thread(thread);
                }
            });
        }
    }
}

/// Who a thread under initialization is meant for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Growth {
    /// A worker instance; outside `growing`.
    Worker,
    /// The request caller that reserved the growth.
    Caller,
    /// Parked waiters (after a resize or a failed caller growth).
    Waiters,
}

/// Shuts down a thread whose initialization was abandoned mid-way.
///
/// A dropped caller growth also frees its headroom for parked waiters.
struct InitGuard<'a> {
    shared: &'a Arc<Shared>,
    thread: ThreadId,
    growth: Growth,
    armed: bool,
}

impl<'a> InitGuard<'a> {
    fn new(shared: &'a Arc<Shared>, thread: ThreadId, growth: Growth) -> Self {
        Self {
            shared,
            thread,
            growth,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for InitGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if self.growth != Growth::Worker {
            self.shared.state.lock().growing -= 1;
        }
        self.shared.runtime.shutdown_thread(self.thread);
        if self.growth == Growth::Caller {
            self.shared.grow_for_waiters();
        }
    }
}

/// Removes a parked waiter if its `acquire` future is dropped.
struct WaitGuard<'a> {
    shared: &'a Shared,
    id: u64,
    rx: oneshot::Receiver<ThreadId>,
    done: bool,
}

impl WaitGuard<'_> {
    fn finish(&mut self) {
        self.done = true;
        self.shared.metrics.dequeued_request();
    }
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let queued = self.shared.state.lock().remove_waiter(self.id);
        if !queued {
            if let Ok(thread) = self.rx.try_recv() {
                let _ = self.shared.release_thread(thread);
            }
        }
        self.shared.metrics.dequeued_request();
    }
}

/// Elastic pool of interpreter threads with admission control.
///
/// Cheap to clone; clones share the same threads.
#[derive(Clone)]
pub struct ThreadPool {
    shared: Arc<Shared>,
}

impl ThreadPool {
    /// Initializes the floor of `num_threads` threads concurrently.
    ///
    /// ### Errors
    /// The first [`PoolError::ThreadInitFailure`] if any floor thread fails;
    /// threads that did start are shut down again.
    pub async fn start(
        config: &Config,
        runtime: Arc<dyn ScriptRuntime>,
        bus: Bus,
    ) -> Result<Self, PoolError> {
        let floor = config.num_threads();
        let shared = Arc::new(Shared {
            state: Mutex::new(PoolState::new(floor, config.effective_max_threads())),
            runtime,
            ini: config.php_ini().clone(),
            bus,
            metrics: Arc::clone(config.metrics()),
            max_wait: config.max_wait_time(),
            next_thread: AtomicU64::new(1),
            handle: Handle::current(),
        });

        let threads: Vec<ThreadId> = (0..floor).map(|_| shared.next_thread()).collect();
        let results = join_all(threads.into_iter().map(|thread| {
            let shared = &shared;
            async move { (thread, shared.runtime.init_thread(thread, &shared.ini).await) }
        }))
        .await;

        let mut started = Vec::with_capacity(floor);
        let mut failure = None;
        for (thread, res) in results {
            match res {
                Ok(()) => started.push(thread),
                Err(e) => {
                    shared.start_failed(thread, None, &e.reason);
                    if failure.is_none() {
                        failure = Some(PoolError::ThreadInitFailure {
                            thread,
                            reason: e.reason,
                        });
                    }
                }
            }
        }
        if let Some(err) = failure {
            for thread in started {
                shared.terminate(thread, None);
            }
            return Err(err);
        }

        let gauges = {
            let mut st = shared.state.lock();
            for &thread in &started {
                st.insert_idle(thread);
            }
            st.gauges()
        };
        for &thread in &started {
            shared.started(thread, None);
        }
        shared.report(gauges);
        Ok(Self { shared })
    }

    /// Acquires a request thread, waiting at most the configured `max_wait_time`.
    pub async fn acquire(&self) -> Result<ThreadGrant, PoolError> {
        self.acquire_timeout(self.shared.max_wait).await
    }

    /// Acquires a request thread, waiting at most `wait`.
    ///
    /// ### Errors
    /// - [`PoolError::PoolExhausted`]: no thread within `wait` (at once if `wait` is zero)
    /// - [`PoolError::ThreadInitFailure`]: growing a new thread failed
    /// - [`PoolError::Closed`]: the pool was closed
    pub async fn acquire_timeout(&self, wait: Duration) -> Result<ThreadGrant, PoolError> {
        let started = Instant::now();
        let (admit, gauges, rejected) = {
            let mut st = self.shared.state.lock();
            let admit = st.admit(!wait.is_zero(), || self.shared.next_thread());
            (admit, st.gauges(), st.rejected)
        };

        match admit {
            Admit::Granted(thread) => {
                self.shared.report(gauges);
                Ok(self.grant(thread))
            }
            Admit::Grow(thread) => self.grow(thread).await,
            Admit::Reject => Err(self.shared.reject(Duration::ZERO, rejected)),
            Admit::Closed => Err(PoolError::Closed),
            Admit::Wait(id, rx) => self.wait_for_thread(id, rx, wait, started).await,
        }
    }

    /// Gives a grant back; rejects grants issued by another pool.
    pub fn release(&self, grant: ThreadGrant) -> Result<(), PoolError> {
        if !grant.belongs_to(&self.shared) {
            return Err(PoolError::ForeignGrant {
                thread: grant.thread(),
            });
        }
        grant.release()
    }

    /// Acquires a thread, marks it executing, runs `f` and releases the thread.
    pub async fn with_thread<F, Fut, T>(&self, f: F) -> Result<T, PoolError>
    where
        F: FnOnce(ThreadId) -> Fut,
        Fut: Future<Output = T>,
    {
        let grant = self.acquire().await?;
        grant.begin()?;
        let out = f(grant.thread()).await;
        grant.release()?;
        Ok(out)
    }

    /// Creates a dedicated, permanently reserved thread for a worker instance.
    ///
    /// The thread is outside the request floor and ceiling and is terminated
    /// when released.
    pub async fn acquire_worker(&self, worker: impl Into<Arc<str>>) -> Result<ThreadGrant, PoolError> {
        let worker: Arc<str> = worker.into();
        if self.shared.state.lock().closed {
            return Err(PoolError::Closed);
        }

        let thread = self.shared.next_thread();
        let mut guard = InitGuard::new(&self.shared, thread, Growth::Worker);
        let res = self.shared.runtime.init_thread(thread, &self.shared.ini).await;
        guard.disarm();

        if let Err(e) = res {
            self.shared.start_failed(thread, Some(&worker), &e.reason);
            return Err(PoolError::ThreadInitFailure {
                thread,
                reason: e.reason,
            });
        }

        let gauges = {
            let mut st = self.shared.state.lock();
            if st.closed {
                None
            } else {
                st.insert_reserved(thread, SlotKind::Worker(Arc::clone(&worker)));
                Some(st.gauges())
            }
        };
        let Some(gauges) = gauges else {
            self.shared.runtime.shutdown_thread(thread);
            return Err(PoolError::Closed);
        };
        self.shared.started(thread, Some(&worker));
        self.shared.report(gauges);
        Ok(self.grant(thread))
    }

    /// Changes the request ceiling (clamped to the floor).
    ///
    /// Executing threads are untouched; idle threads above a lowered ceiling
    /// are terminated and new headroom is used at once for parked waiters.
    /// Growth runs on the runtime the pool was started on, so this may be
    /// called from any thread.
    pub fn resize(&self, new_max: usize) {
        let (ceiling, surplus, gauges) = {
            let mut st = self.shared.state.lock();
            st.ceiling = new_max.max(st.floor);
            let surplus = st.shrink_idle();
            (st.ceiling, surplus, st.gauges())
        };

        for thread in surplus {
            self.shared.terminate(thread, None);
        }
        self.shared
            .bus
            .publish(Event::new(EventKind::PoolResized).with_count(ceiling as u64));
        self.shared.report(gauges);
        self.shared.grow_for_waiters();
    }

    /// Point-in-time counters.
    pub fn stats(&self) -> PoolStats {
        self.shared.state.lock().stats()
    }

    /// Threads currently held by instances of `worker`.
    pub fn worker_threads(&self, worker: &str) -> usize {
        self.shared.state.lock().worker_count(Some(worker))
    }

    /// State of a live thread; `None` once terminated.
    pub fn thread_state(&self, thread: ThreadId) -> Option<ThreadState> {
        self.shared
            .state
            .lock()
            .threads
            .get(&thread)
            .map(|slot| slot.state)
    }

    /// Stops granting threads.
    ///
    /// Parked waiters fail with [`PoolError::Closed`], idle threads are shut down
    /// and outstanding grants terminate their thread on release. Idempotent.
    pub fn close(&self) {
        let (idle, gauges) = {
            let mut st = self.shared.state.lock();
            if st.closed {
                return;
            }
            let idle = st.close();
            (idle, st.gauges())
        };
        for thread in idle {
            self.shared.terminate(thread, None);
        }
        self.shared.bus.publish(Event::new(EventKind::PoolClosed));
        self.shared.report(gauges);
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    fn grant(&self, thread: ThreadId) -> ThreadGrant {
        ThreadGrant::new(Arc::clone(&self.shared), thread)
    }

    async fn grow(&self, thread: ThreadId) -> Result<ThreadGrant, PoolError> {
        self.shared.init_request_thread(thread, Growth::Caller).await?;
        let gauges = self.shared.state.lock().gauges();
        self.shared.report(gauges);
        Ok(self.grant(thread))
    }

    async fn wait_for_thread(
        &self,
        id: u64,
        rx: oneshot::Receiver<ThreadId>,
        wait: Duration,
        started: Instant,
    ) -> Result<ThreadGrant, PoolError> {
        self.shared.metrics.queued_request();
        let mut guard = WaitGuard {
            shared: &self.shared,
            id,
            rx,
            done: false,
        };

        match time::timeout(wait, &mut guard.rx).await {
            Ok(Ok(thread)) => {
                guard.finish();
                Ok(self.grant(thread))
            }
            Ok(Err(_)) => {
                guard.finish();
                Err(PoolError::Closed)
            }
            Err(_elapsed) => {
                let rejected = {
                    let mut st = self.shared.state.lock();
                    if st.remove_waiter(id) {
                        st.rejected += 1;
                        Some(st.rejected)
                    } else {
                        None
                    }
                };
                guard.finish();
                match rejected {
                    Some(count) => Err(self.shared.reject(started.elapsed(), count)),
                    // Handed a thread right as the wait expired.
                    None => match guard.rx.try_recv() {
                        Ok(thread) => Ok(self.grant(thread)),
                        Err(_) => Err(PoolError::Closed),
                    },
                }
            }
        }
    }
}

impl std::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPool")
            .field("stats", &self.stats())
            .finish()
    }
}
