//! # File-change watching and restart coalescing.
//!
//! Changed paths come from two sources and share one channel:
//! - the OS, through a `notify` watcher registered on every pattern root;
//! - [`Supervisor::notify_change`](crate::Supervisor::notify_change).
//!
//! ```text
//! notify callback ──┐
//!                   ├──► mpsc<PathBuf> ──► coalesce() ──(debounce)──► group.request_restart()
//! notify_change() ──┘        │                  │                     publish WorkerRestartScheduled
//!                            └── WatchSet::matching(path) → group indices
//! ```
//!
//! ## Rules
//! - A path matching no declaration is dropped.
//! - Within one debounce window every declaration restarts at most once, no
//!   matter how many changes matched it.
//! - The window opens at the first matching change and is not extended by
//!   later ones, so a steady stream of writes cannot postpone restarts forever.
//! - Watch registration failures are reported as `WatchFailed`, never fatal.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::future::OptionFuture;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use crate::core::registry::WorkerGroup;
use crate::events::{Bus, Event, EventKind};
use crate::workers::WatchPattern;

/// Union of every declaration's watch patterns, anchored at one base directory.
#[derive(Debug, Clone, Default)]
pub(crate) struct WatchSet {
    entries: Vec<(usize, WatchPattern)>,
}

impl WatchSet {
    /// Builds the set from groups in declaration order; relative patterns are
    /// resolved against `base`.
    pub fn new(groups: &[Arc<WorkerGroup>], base: &Path) -> Self {
        let entries = groups
            .iter()
            .enumerate()
            .flat_map(|(idx, group)| {
                group
                    .decl()
                    .watch()
                    .iter()
                    .map(move |pattern| (idx, pattern.resolve(base)))
            })
            .collect();
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Indices of the groups whose patterns match `path`, ascending, no duplicates.
    pub fn matching(&self, path: &Path) -> BTreeSet<usize> {
        self.entries
            .iter()
            .filter(|(_, pattern)| pattern.matches(path))
            .map(|(idx, _)| *idx)
            .collect()
    }

    /// Distinct directories/files to register with the OS watcher.
    pub fn roots(&self) -> BTreeSet<PathBuf> {
        self.entries.iter().map(|(_, p)| p.root()).collect()
    }
}

/// Collects changed paths and turns them into at most one restart per group per window.
pub(crate) async fn coalesce(
    mut rx: mpsc::UnboundedReceiver<PathBuf>,
    set: WatchSet,
    groups: Vec<Arc<WorkerGroup>>,
    debounce: Duration,
    bus: Bus,
    token: CancellationToken,
) {
    let mut pending: BTreeMap<usize, PathBuf> = BTreeMap::new();
    let mut deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            msg = rx.recv() => {
                let Some(path) = msg else { break };
                for idx in set.matching(&path) {
                    pending.entry(idx).or_insert_with(|| path.clone());
                }
                if !pending.is_empty() && deadline.is_none() {
                    deadline = Some(Instant::now() + debounce);
                }
            }
            Some(()) = OptionFuture::from(deadline.map(time::sleep_until)) => {
                deadline = None;
                for (idx, path) in std::mem::take(&mut pending) {
                    let group = &groups[idx];
                    if !group.is_active() {
                        continue;
                    }
                    group.request_restart();
                    bus.publish(
                        Event::new(EventKind::WorkerRestartScheduled)
                            .with_worker(group.decl().shared_name())
                            .with_path(&path),
                    );
                }
            }
        }
    }
}

/// Registers OS watches on every root of `set`, forwarding changed paths to `tx`.
///
/// Returns `None` when no watcher could be created; each root that cannot be
/// watched is reported as `WatchFailed` and skipped.
pub(crate) fn watch_roots(
    set: &WatchSet,
    tx: mpsc::UnboundedSender<PathBuf>,
    bus: &Bus,
) -> Option<RecommendedWatcher> {
    if set.is_empty() {
        return None;
    }

    let cb_bus = bus.clone();
    let watcher = notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| {
        match res {
            Ok(event) => {
                if matches!(event.kind, notify::EventKind::Access(_)) {
                    return;
                }
                for path in event.paths {
                    let _ = tx.send(path);
                }
            }
            Err(e) => {
                let mut ev = Event::new(EventKind::WatchFailed).with_reason(e.to_string());
                if let Some(path) = e.paths.first() {
                    ev = ev.with_path(path);
                }
                cb_bus.publish(ev);
            }
        }
    });

    let mut watcher = match watcher {
        Ok(w) => w,
        Err(e) => {
            bus.publish(Event::new(EventKind::WatchFailed).with_reason(e.to_string()));
            return None;
        }
    };

    for root in set.roots() {
        if let Err(e) = watcher.watch(&root, RecursiveMode::Recursive) {
            bus.publish(
                Event::new(EventKind::WatchFailed)
                    .with_path(&root)
                    .with_reason(e.to_string()),
            );
        }
    }
    Some(watcher)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    use crate::core::registry::Registry;
    use crate::workers::WorkerDeclaration;

    fn registry(token: &CancellationToken) -> Registry {
        let decls = [
            WorkerDeclaration::new("php", "w.php", 1, Vec::<(String, String)>::new(), ["src/**/*.php"]).unwrap(),
            WorkerDeclaration::new("cfg", "c.php", 1, Vec::<(String, String)>::new(), ["config", "src/**/*.php"]).unwrap(),
        ];
        Registry::new(&decls, token).unwrap()
    }

    #[test]
    fn test_matching_maps_paths_to_groups() {
        let token = CancellationToken::new();
        let reg = registry(&token);
        let set = WatchSet::new(reg.groups(), Path::new("/app"));

        assert_eq!(
            set.matching(Path::new("/app/src/a/b.php")),
            BTreeSet::from([0, 1])
        );
        assert_eq!(
            set.matching(Path::new("/app/config/db.yaml")),
            BTreeSet::from([1])
        );
        assert!(set.matching(Path::new("/app/public/index.html")).is_empty());
        assert_eq!(
            set.roots(),
            BTreeSet::from([PathBuf::from("/app/src"), PathBuf::from("/app/config")])
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_restarts_each_group_once() {
        let token = CancellationToken::new();
        let reg = registry(&token);
        let set = WatchSet::new(reg.groups(), Path::new("/app"));
        let mut gens: Vec<_> = reg.groups().iter().map(|g| g.restarts()).collect();

        let (tx, rx) = mpsc::unbounded_channel();
        let bus = Bus::new(64);
        let mut events = bus.subscribe();
        let task = tokio::spawn(coalesce(
            rx,
            set,
            reg.groups().to_vec(),
            Duration::from_millis(100),
            bus,
            token.clone(),
        ));

        for _ in 0..3 {
            tx.send(PathBuf::from("/app/src/x.php")).unwrap();
            time::sleep(Duration::from_millis(10)).await;
        }
        tx.send(PathBuf::from("/app/README.md")).unwrap();
        time::sleep(Duration::from_millis(200)).await;

        assert_eq!(*gens[0].borrow_and_update(), 1);
        assert_eq!(*gens[1].borrow_and_update(), 1);

        let first = events.recv().await.unwrap();
        assert_eq!(first.kind, EventKind::WorkerRestartScheduled);
        assert_eq!(first.worker.as_deref(), Some("php"));
        assert_eq!(first.path.as_deref(), Some(Path::new("/app/src/x.php")));

        token.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_unmatched_change_restarts_nothing() {
        let token = CancellationToken::new();
        let reg = registry(&token);
        let set = WatchSet::new(reg.groups(), Path::new("/app"));
        let mut gen0 = reg.groups()[0].restarts();

        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(coalesce(
            rx,
            set,
            reg.groups().to_vec(),
            Duration::from_millis(50),
            Bus::new(8),
            token.clone(),
        ));
        tx.send(PathBuf::from("/elsewhere/x.php")).unwrap();
        time::sleep(Duration::from_millis(200)).await;

        assert!(!gen0.has_changed().unwrap());
        token.cancel();
        task.await.unwrap();
    }
}
