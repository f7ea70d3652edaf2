//! # Engine: the process-wide context.
//!
//! [`Engine`] owns every long-lived part of the core and wires them together:
//!
//! ```text
//! Engine::start(config, runtime)
//!   ├─ Bus::new(bus_capacity)
//!   ├─ SubscriberSet[logger]  ◄── listener ◄── Bus
//!   ├─ config.check_unique_workers()
//!   ├─ ThreadPool::start()     floor threads
//!   └─ Supervisor::start()     one thread per worker instance
//!
//! Engine::shutdown()
//!   ├─ supervisor.shutdown()   within shutdown_grace
//!   ├─ pool.close()            idle threads terminated, waiters get Closed
//!   └─ listener drained, subscriber queues flushed
//! ```
//!
//! Nothing is global: two engines in one process are fully independent.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, ConfigOption};
use crate::core::Supervisor;
use crate::core::shutdown::wait_for_shutdown_signal;
use crate::error::{RuntimeError, StartError};
use crate::events::{Bus, Event};
use crate::pool::ThreadPool;
use crate::runtime::ScriptRuntime;
use crate::subscribers::SubscriberSet;

/// Running pool plus worker supervisor, with event delivery to the logger.
pub struct Engine {
    config: Arc<Config>,
    bus: Bus,
    subs: Arc<SubscriberSet>,
    listener: JoinHandle<()>,
    listener_token: CancellationToken,
    pool: ThreadPool,
    supervisor: Supervisor,
}

impl Engine {
    /// Starts the pool and every declared worker instance.
    ///
    /// On error everything already started is torn down before returning.
    pub async fn start(config: Config, runtime: Arc<dyn ScriptRuntime>) -> Result<Self, StartError> {
        let config = Arc::new(config);
        let bus = Bus::new(config.bus_capacity());
        let subs = Arc::new(SubscriberSet::new(
            vec![Arc::clone(config.logger())],
            bus.clone(),
        ));
        let listener_token = CancellationToken::new();
        let listener = spawn_listener(bus.subscribe(), Arc::clone(&subs), listener_token.clone());

        let started = async {
            config.check_unique_workers()?;
            let pool = ThreadPool::start(&config, Arc::clone(&runtime), bus.clone()).await?;
            match Supervisor::start(Arc::clone(&config), pool.clone(), runtime, bus.clone()).await {
                Ok(supervisor) => Ok::<_, StartError>((pool, supervisor)),
                Err(e) => {
                    pool.close();
                    Err(e)
                }
            }
        };

        match started.await {
            Ok((pool, supervisor)) => Ok(Self {
                config,
                bus,
                subs,
                listener,
                listener_token,
                pool,
                supervisor,
            }),
            Err(e) => {
                tracing::error!(error = %e, label = e.as_label(), "engine start failed");
                listener_token.cancel();
                let _ = listener.await;
                if let Ok(set) = Arc::try_unwrap(subs) {
                    set.shutdown().await;
                }
                Err(e)
            }
        }
    }

    /// Builds the configuration from `options` (fail-fast, in order) and starts.
    pub async fn from_options<I>(options: I, runtime: Arc<dyn ScriptRuntime>) -> Result<Self, StartError>
    where
        I: IntoIterator<Item = ConfigOption>,
    {
        let config = Config::from_options(options)?;
        Self::start(config, runtime).await
    }

    /// The request-thread pool.
    pub fn pool(&self) -> &ThreadPool {
        &self.pool
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// New receiver of every event published from now on.
    pub fn events(&self) -> broadcast::Receiver<Event> {
        self.bus.subscribe()
    }

    /// Stops the workers, closes the pool and flushes the logger.
    ///
    /// Returns `GraceExceeded` if some instance outlived `shutdown_grace`; the
    /// pool is closed and the logger flushed regardless.
    pub async fn shutdown(self) -> Result<(), RuntimeError> {
        let res = self.supervisor.shutdown().await;
        self.pool.close();

        self.listener_token.cancel();
        let _ = self.listener.await;
        drop(self.supervisor);
        if let Ok(set) = Arc::try_unwrap(self.subs) {
            set.shutdown().await;
        }
        res
    }

    /// Runs until SIGINT/SIGTERM/SIGQUIT (Ctrl-C elsewhere), then shuts down.
    pub async fn run_until_signal(self) -> Result<(), RuntimeError> {
        if let Err(e) = wait_for_shutdown_signal().await {
            tracing::warn!(error = %e, "signal handlers unavailable, shutting down");
        }
        self.shutdown().await
    }
}

/// Forwards bus events to the subscriber set until cancelled, then drains what is queued.
fn spawn_listener(
    mut rx: broadcast::Receiver<Event>,
    subs: Arc<SubscriberSet>,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                msg = rx.recv() => match msg {
                    Ok(ev) => subs.emit(&ev),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return,
                },
                _ = token.cancelled() => break,
            }
        }
        loop {
            match rx.try_recv() {
                Ok(ev) => subs.emit(&ev),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return,
            }
        }
    })
}
