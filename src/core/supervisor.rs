//! # Supervisor: persistent worker instances, restarts and graceful shutdown.
//!
//! The [`Supervisor`] starts `instances` actors per worker declaration, each
//! holding a dedicated pool thread, restarts them when watched files change,
//! isolates failing declarations and stops everything within a grace period.
//!
//! ## Start sequence
//! ```text
//! Supervisor::start(cfg, pool, runtime, bus)
//!   ├─ Registry::new(cfg.workers)        duplicate name → ConfigError::DuplicateWorker
//!   ├─ alive listener: Bus ─► AliveTracker
//!   ├─ pool.acquire_worker(name) × Σ instances
//!   │     any failure → release acquired threads, PoolError
//!   ├─ JoinSet::spawn(WorkerActor::run) per instance
//!   └─ watchers: notify roots + notify_change() ─► coalesce() ─► request_restart()
//! ```
//!
//! ## Shutdown path
//! ```text
//! shutdown()
//!   └─► Bus.publish(ShutdownRequested)
//!   └─► token.cancel()  → every group token → every iteration token
//!   └─► join all actors within cfg.shutdown_grace:
//!          ├─ Ok      → AllStoppedWithin
//!          └─ timeout → GraceExceeded, abort stragglers,
//!                       RuntimeError::GraceExceeded { stuck } from AliveTracker
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{Mutex as AsyncMutex, broadcast, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::core::actor::{ActorParams, WorkerActor};
use crate::core::alive::AliveTracker;
use crate::core::registry::{Registry, WorkerStatus};
use crate::core::watcher::{WatchSet, coalesce, watch_roots};
use crate::error::{RuntimeError, StartError};
use crate::events::{Bus, Event, EventKind};
use crate::pool::{ThreadGrant, ThreadPool};
use crate::runtime::ScriptRuntime;

/// Supervises the persistent worker instances of every declaration.
pub struct Supervisor {
    cfg: Arc<Config>,
    bus: Bus,
    registry: Arc<Registry>,
    token: CancellationToken,
    listener_token: CancellationToken,
    alive: Arc<AliveTracker>,
    changes: mpsc::UnboundedSender<PathBuf>,
    base: PathBuf,
    actors: AsyncMutex<JoinSet<()>>,
    watcher: parking_lot::Mutex<Option<notify::RecommendedWatcher>>,
}

impl Supervisor {
    /// Starts every declared instance.
    ///
    /// ### Errors
    /// - [`StartError::Config`] with `DuplicateWorker` if two declarations share a name
    /// - [`StartError::Pool`] if a worker thread cannot be created; threads
    ///   already acquired are released and nothing keeps running
    pub async fn start(
        cfg: Arc<Config>,
        pool: ThreadPool,
        runtime: Arc<dyn ScriptRuntime>,
        bus: Bus,
    ) -> Result<Self, StartError> {
        let token = CancellationToken::new();
        let registry = Arc::new(Registry::new(cfg.workers(), &token)?);

        let alive = Arc::new(AliveTracker::new());
        let listener_token = CancellationToken::new();
        alive_listener(bus.subscribe(), Arc::clone(&alive), listener_token.clone());

        let mut initial: Vec<(usize, u32, ThreadGrant)> = Vec::new();
        for (idx, group) in registry.groups().iter().enumerate() {
            for instance in 0..group.decl().instances() {
                match pool.acquire_worker(group.decl().shared_name()).await {
                    Ok(grant) => initial.push((idx, instance, grant)),
                    Err(e) => {
                        drop(initial);
                        token.cancel();
                        listener_token.cancel();
                        return Err(StartError::Pool(e));
                    }
                }
            }
        }

        let params = ActorParams {
            pool,
            runtime,
            bus: bus.clone(),
            metrics: Arc::clone(cfg.metrics()),
            backoff: cfg.worker_backoff(),
            failures: cfg.worker_failures(),
            restart_grace: cfg.restart_grace(),
        };
        let mut actors = JoinSet::new();
        for (idx, instance, grant) in initial {
            let group = Arc::clone(&registry.groups()[idx]);
            let restarts = group.restarts();
            let actor = WorkerActor::new(group, instance, params.clone());
            actors.spawn(actor.run(grant, restarts));
        }

        let base = std::env::current_dir().unwrap_or_default();
        let set = WatchSet::new(registry.groups(), &base);
        let (changes, rx) = mpsc::unbounded_channel();
        let watcher = watch_roots(&set, changes.clone(), &bus);
        tokio::spawn(coalesce(
            rx,
            set,
            registry.groups().to_vec(),
            cfg.watch_debounce(),
            bus.clone(),
            token.clone(),
        ));

        Ok(Self {
            cfg,
            bus,
            registry,
            token,
            listener_token,
            alive,
            changes,
            base,
            actors: AsyncMutex::new(actors),
            watcher: parking_lot::Mutex::new(watcher),
        })
    }

    /// Reports a changed file, as the OS watcher would.
    ///
    /// Relative paths are resolved against the working directory at start.
    pub fn notify_change(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base.join(path)
        };
        let _ = self.changes.send(path);
    }

    /// Schedules a graceful restart of every instance of `name`.
    ///
    /// Returns `false` if no such worker exists or it is no longer active.
    pub fn restart(&self, name: &str) -> bool {
        let Some(group) = self.registry.get(name) else {
            return false;
        };
        if !group.is_active() {
            return false;
        }
        group.request_restart();
        self.bus.publish(
            Event::new(EventKind::WorkerRestartScheduled).with_worker(group.decl().shared_name()),
        );
        true
    }

    /// Status of a declaration, `None` if it was never declared.
    pub fn status(&self, name: &str) -> Option<WorkerStatus> {
        self.registry.get(name).map(|group| group.status())
    }

    /// Declared worker names in declaration order.
    pub fn workers(&self) -> Vec<String> {
        self.registry
            .groups()
            .iter()
            .map(|g| g.name().to_string())
            .collect()
    }

    /// `WorkerFatal` errors of every declaration that gave up.
    pub fn fatal_errors(&self) -> Vec<RuntimeError> {
        self.registry
            .groups()
            .iter()
            .filter_map(|g| g.fatal())
            .collect()
    }

    /// Instances currently holding a thread (`"<worker>#<instance>"`, sorted).
    pub fn alive_instances(&self) -> Vec<String> {
        self.alive.snapshot()
    }

    /// Stops every instance and waits up to `shutdown_grace`.
    ///
    /// Instances still running after the grace are aborted (their threads are
    /// released) and reported in [`RuntimeError::GraceExceeded`].
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        self.bus.publish(Event::new(EventKind::ShutdownRequested));
        self.token.cancel();
        self.watcher.lock().take();

        let grace = self.cfg.shutdown_grace();
        let mut actors = self.actors.lock().await;
        let timed = {
            let done = async { while actors.join_next().await.is_some() {} };
            tokio::time::timeout(grace, done).await
        };
        let res = match timed {
            Ok(()) => {
                self.bus.publish(Event::new(EventKind::AllStoppedWithin));
                Ok(())
            }
            Err(_) => {
                let stuck = self.alive.snapshot();
                self.bus.publish(
                    Event::new(EventKind::GraceExceeded).with_reason(stuck.join(",")),
                );
                actors.abort_all();
                while actors.join_next().await.is_some() {}
                Err(RuntimeError::GraceExceeded { grace, stuck })
            }
        };
        self.listener_token.cancel();
        res
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.token.cancel();
        self.listener_token.cancel();
    }
}

/// Feeds `WorkerStarted`/`WorkerStopped` into the tracker until cancelled.
fn alive_listener(
    mut rx: broadcast::Receiver<Event>,
    alive: Arc<AliveTracker>,
    token: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                msg = rx.recv() => match msg {
                    Ok(ev) => {
                        alive.update(&ev);
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = token.cancelled() => break,
            }
        }
    });
}
