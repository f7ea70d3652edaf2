//! # Worker groups.
//!
//! One [`WorkerGroup`] per declaration holds everything its instances share:
//! the declaration, the restart generation, a cancellation token that stops
//! every instance of the group, and status counters.
//!
//! ```text
//! Registry
//!   ├─ "mailer" ─► WorkerGroup { restart_tx (gen), token, state }
//!   │                 ├─ WorkerActor #0 ─ restarts.changed()
//!   │                 └─ WorkerActor #1 ─ restarts.changed()
//!   └─ "indexer" ─► WorkerGroup { ... }
//! ```
//!
//! ## Rules
//! - Names are unique; a duplicate fails with `ConfigError::DuplicateWorker`.
//! - `request_restart()` bumps the generation once; every instance observes it.
//! - The first fatal error of a group is kept; later ones are ignored.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::{ConfigError, RuntimeError};
use crate::workers::WorkerDeclaration;

/// Lifecycle of a worker declaration as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    /// Every instance is serving iterations.
    Running,
    /// At least one instance is being torn down for a restart.
    Restarting,
    /// The group exceeded its failure threshold; no instance runs.
    Fatal,
    /// The group was shut down.
    Stopped,
}

#[derive(Debug, Default)]
struct GroupState {
    live: u32,
    restarting: u32,
    fatal: Option<RuntimeError>,
}

pub(crate) struct WorkerGroup {
    decl: Arc<WorkerDeclaration>,
    restart_tx: watch::Sender<u64>,
    token: CancellationToken,
    state: Mutex<GroupState>,
}

impl WorkerGroup {
    fn new(decl: WorkerDeclaration, parent: &CancellationToken) -> Self {
        let (restart_tx, _rx) = watch::channel(0);
        Self {
            decl: Arc::new(decl),
            restart_tx,
            token: parent.child_token(),
            state: Mutex::new(GroupState::default()),
        }
    }

    pub fn decl(&self) -> &Arc<WorkerDeclaration> {
        &self.decl
    }

    pub fn name(&self) -> &str {
        self.decl.name()
    }

    /// Token cancelled on shutdown or when the group turns fatal.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Receiver observing restart requests issued after this call.
    pub fn restarts(&self) -> watch::Receiver<u64> {
        self.restart_tx.subscribe()
    }

    /// Schedules a graceful restart of every instance; returns the new generation.
    pub fn request_restart(&self) -> u64 {
        self.restart_tx.send_modify(|generation| *generation += 1);
        *self.restart_tx.borrow()
    }

    /// False once the group is fatal or shutting down.
    pub fn is_active(&self) -> bool {
        !self.token.is_cancelled()
    }

    pub fn instance_started(&self) {
        self.state.lock().live += 1;
    }

    pub fn instance_exited(&self) {
        let mut st = self.state.lock();
        st.live = st.live.saturating_sub(1);
    }

    pub fn restart_began(&self) {
        self.state.lock().restarting += 1;
    }

    pub fn restart_ended(&self) {
        let mut st = self.state.lock();
        st.restarting = st.restarting.saturating_sub(1);
    }

    /// Records the fatal error (first one wins) and stops every instance.
    pub fn mark_fatal(&self, err: RuntimeError) -> bool {
        let first = {
            let mut st = self.state.lock();
            if st.fatal.is_none() {
                st.fatal = Some(err);
                true
            } else {
                false
            }
        };
        self.token.cancel();
        first
    }

    pub fn fatal(&self) -> Option<RuntimeError> {
        self.state.lock().fatal.clone()
    }

    pub fn status(&self) -> WorkerStatus {
        let st = self.state.lock();
        if st.fatal.is_some() {
            WorkerStatus::Fatal
        } else if self.token.is_cancelled() || st.live == 0 {
            WorkerStatus::Stopped
        } else if st.restarting > 0 {
            WorkerStatus::Restarting
        } else {
            WorkerStatus::Running
        }
    }
}

/// Worker groups in declaration order, indexed by name.
pub(crate) struct Registry {
    groups: Vec<Arc<WorkerGroup>>,
    by_name: HashMap<Arc<str>, usize>,
}

impl Registry {
    pub fn new(
        workers: &[WorkerDeclaration],
        parent: &CancellationToken,
    ) -> Result<Self, ConfigError> {
        let mut groups = Vec::with_capacity(workers.len());
        let mut by_name = HashMap::with_capacity(workers.len());

        for decl in workers {
            if by_name.insert(decl.shared_name(), groups.len()).is_some() {
                return Err(ConfigError::DuplicateWorker {
                    name: decl.name().to_string(),
                });
            }
            groups.push(Arc::new(WorkerGroup::new(decl.clone(), parent)));
        }
        Ok(Self { groups, by_name })
    }

    pub fn get(&self, name: &str) -> Option<&Arc<WorkerGroup>> {
        self.by_name.get(name).map(|&idx| &self.groups[idx])
    }

    pub fn groups(&self) -> &[Arc<WorkerGroup>] {
        &self.groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decl(name: &str, n: u32) -> WorkerDeclaration {
        WorkerDeclaration::new(name, "w.php", n, Vec::<(String, String)>::new(), ["src"]).unwrap()
    }

    #[test]
    fn test_duplicate_name_is_rejected() {
        let token = CancellationToken::new();
        let err = Registry::new(&[decl("a", 1), decl("b", 1), decl("a", 2)], &token)
            .err()
            .unwrap();
        assert_eq!(err, ConfigError::DuplicateWorker { name: "a".into() });
    }

    #[test]
    fn test_restart_generation_is_observed_once() {
        let token = CancellationToken::new();
        let reg = Registry::new(&[decl("a", 1)], &token).unwrap();
        let group = reg.get("a").unwrap();
        let mut rx = group.restarts();

        assert!(!rx.has_changed().unwrap());
        assert_eq!(group.request_restart(), 1);
        assert_eq!(group.request_restart(), 2);
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), 2);
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn test_status_transitions() {
        let token = CancellationToken::new();
        let reg = Registry::new(&[decl("a", 1), decl("b", 1)], &token).unwrap();
        let (a, b) = (reg.get("a").unwrap(), reg.get("b").unwrap());

        assert_eq!(a.status(), WorkerStatus::Stopped);
        a.instance_started();
        b.instance_started();
        assert_eq!(a.status(), WorkerStatus::Running);
        a.restart_began();
        assert_eq!(a.status(), WorkerStatus::Restarting);
        a.restart_ended();

        let fatal = RuntimeError::WorkerFatal {
            worker: "a".into(),
            failures: 3,
            error: "boom".into(),
        };
        assert!(a.mark_fatal(fatal.clone()));
        assert!(!a.mark_fatal(fatal.clone()));
        assert_eq!(a.status(), WorkerStatus::Fatal);
        assert_eq!(a.fatal(), Some(fatal));
        assert_eq!(b.status(), WorkerStatus::Running);

        token.cancel();
        assert_eq!(b.status(), WorkerStatus::Stopped);
    }
}
