//! # Run a single iteration of a worker script.
//!
//! Executes one `run_worker` call while watching the group's restart
//! generation. A restart request does not interrupt the script at once: it
//! gets `restart_grace` to finish, then its child token is cancelled.
//!
//! ```text
//! run_worker(child) ─────────────────────────────► result
//!        │
//! restarts.changed() ─► restart = true, arm timer ─► child.cancel() after grace
//! parent cancelled   ─► propagates to child
//! ```
//!
//! ## Rules
//! - Derives a **child token** per iteration; cancelling it never affects the parent.
//! - The restart generation is marked seen when observed, so one bump causes
//!   exactly one restart of this instance.

use std::time::Duration;

use futures::future::OptionFuture;
use tokio::sync::watch;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::error::ScriptError;
use crate::runtime::{ScriptRuntime, ThreadId, WorkerJob};

/// Outcome of one iteration.
#[derive(Debug)]
pub(crate) struct Iteration {
    pub result: Result<(), ScriptError>,
    /// A restart was requested while the script ran.
    pub restart: bool,
}

pub(crate) async fn run_iteration(
    runtime: &dyn ScriptRuntime,
    thread: ThreadId,
    job: &WorkerJob<'_>,
    parent: &CancellationToken,
    restarts: &mut watch::Receiver<u64>,
    restart_grace: Duration,
) -> Iteration {
    let child = parent.child_token();
    let script = runtime.run_worker(thread, job, child.clone());
    tokio::pin!(script);

    let mut restart = false;
    let mut watching = true;
    let mut grace = None;

    loop {
        tokio::select! {
            result = &mut script => {
                return Iteration { result, restart };
            }
            changed = restarts.changed(), if watching => {
                watching = false;
                if changed.is_ok() {
                    restarts.borrow_and_update();
                    restart = true;
                    grace = Some(Box::pin(time::sleep(restart_grace)));
                }
            }
            Some(()) = OptionFuture::from(grace.as_mut()) => {
                grace = None;
                child.cancel();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::error::ThreadInitError;
    use crate::runtime::IniOverrides;
    use crate::workers::PreparedEnv;

    /// Sleeps `work`, or returns `Canceled` as soon as the token fires.
    struct Sleeper {
        work: Duration,
    }

    #[async_trait]
    impl ScriptRuntime for Sleeper {
        async fn init_thread(&self, _t: ThreadId, _ini: &IniOverrides) -> Result<(), ThreadInitError> {
            Ok(())
        }

        async fn run_worker(
            &self,
            _t: ThreadId,
            _job: &WorkerJob<'_>,
            ctx: CancellationToken,
        ) -> Result<(), ScriptError> {
            tokio::select! {
                _ = time::sleep(self.work) => Ok(()),
                _ = ctx.cancelled() => Err(ScriptError::Canceled),
            }
        }
    }

    fn job(env: &PreparedEnv) -> WorkerJob<'_> {
        WorkerJob {
            worker: "w",
            instance: 0,
            script: std::path::Path::new("w.php"),
            env,
            iteration: 1,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_completes_without_restart() {
        let env = PreparedEnv::default();
        let (_tx, mut rx) = watch::channel(0u64);
        let rt = Sleeper {
            work: Duration::from_millis(10),
        };
        let token = CancellationToken::new();

        let it = run_iteration(&rt, ThreadId(1), &job(&env), &token, &mut rx, Duration::from_secs(1)).await;
        assert_eq!(it.result, Ok(()));
        assert!(!it.restart);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_lets_iteration_finish_within_grace() {
        let env = PreparedEnv::default();
        let (tx, mut rx) = watch::channel(0u64);
        let rt = Sleeper {
            work: Duration::from_millis(100),
        };
        let token = CancellationToken::new();

        tokio::spawn(async move {
            time::sleep(Duration::from_millis(10)).await;
            tx.send_modify(|g| *g += 1);
            time::sleep(Duration::from_secs(10)).await;
        });
        let it = run_iteration(&rt, ThreadId(1), &job(&env), &token, &mut rx, Duration::from_secs(1)).await;
        assert_eq!(it.result, Ok(()));
        assert!(it.restart);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_cancels_after_grace() {
        let env = PreparedEnv::default();
        let (tx, mut rx) = watch::channel(0u64);
        let rt = Sleeper {
            work: Duration::from_secs(60),
        };
        let token = CancellationToken::new();
        tx.send_modify(|g| *g += 1);

        let started = time::Instant::now();
        let it = run_iteration(&rt, ThreadId(1), &job(&env), &token, &mut rx, Duration::from_millis(50)).await;
        assert_eq!(it.result, Err(ScriptError::Canceled));
        assert!(it.restart);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!token.is_cancelled());
    }
}
