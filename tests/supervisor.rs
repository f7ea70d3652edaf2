//! Worker instances: start, change-driven restarts, failure isolation, shutdown.

mod common;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time;

use common::{MockRuntime, Mode, RecordingMetrics};
use scriptvisor::config::{self, Config, ConfigOption};
use scriptvisor::{
    BackoffPolicy, Bus, ConfigError, Engine, Event, EventKind, FailurePolicy, JitterPolicy,
    PoolError, RuntimeError, StartError, Supervisor, ThreadPool, ThreadState, WorkerStatus,
};

const NO_ENV: [(&str, &str); 0] = [];

struct Harness {
    sup: Supervisor,
    pool: ThreadPool,
    rt: Arc<MockRuntime>,
    metrics: Arc<RecordingMetrics>,
    events: broadcast::Receiver<Event>,
}

async fn start(rt: Arc<MockRuntime>, mut opts: Vec<ConfigOption>) -> Result<Harness, StartError> {
    let metrics = Arc::new(RecordingMetrics::default());
    opts.insert(0, config::with_num_threads(1));
    opts.push(config::with_metrics(metrics.clone()));
    let cfg = Arc::new(Config::from_options(opts)?);

    let bus = Bus::new(256);
    let events = bus.subscribe();
    let pool = ThreadPool::start(&cfg, rt.clone(), bus.clone()).await?;
    let sup = Supervisor::start(cfg, pool.clone(), rt.clone(), bus).await?;
    Ok(Harness {
        sup,
        pool,
        rt,
        metrics,
        events,
    })
}

fn watched(dir: &Path) -> String {
    format!("{}/**/*.php", dir.display())
}

fn drain(events: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut out = Vec::new();
    while let Ok(ev) = events.try_recv() {
        out.push(ev);
    }
    out
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_names_fail_start() {
    let err = start(
        MockRuntime::new(),
        vec![
            config::with_workers("mailer", "a.php", 1, NO_ENV, Vec::<String>::new()),
            config::with_workers("mailer", "b.php", 1, NO_ENV, Vec::<String>::new()),
        ],
    )
    .await
    .err()
    .unwrap();

    assert_eq!(
        err,
        StartError::Config(ConfigError::DuplicateWorker {
            name: "mailer".into()
        })
    );
}

#[tokio::test(start_paused = true)]
async fn test_instances_hold_dedicated_threads() {
    let h = start(
        MockRuntime::new(),
        vec![config::with_workers(
            "mailer",
            "mailer.php",
            2,
            [("B", "2"), ("A", "1")],
            Vec::<String>::new(),
        )],
    )
    .await
    .unwrap();
    time::sleep(Duration::from_millis(10)).await;

    assert_eq!(h.pool.worker_threads("mailer"), 2);
    assert_eq!(h.rt.runs("mailer"), 2);
    assert_eq!(h.sup.status("mailer"), Some(WorkerStatus::Running));
    assert_eq!(h.sup.status("missing"), None);
    assert_eq!(h.sup.workers(), vec!["mailer".to_string()]);
    assert_eq!(h.sup.alive_instances(), vec!["mailer#0", "mailer#1"]);

    let env = h.rt.last_env.lock().get("mailer").cloned().unwrap();
    assert_eq!(
        env,
        vec![
            ("A".to_string(), "1".to_string()),
            ("B".to_string(), "2".to_string())
        ]
    );

    // Request traffic is unaffected by worker threads.
    let grant = h.pool.acquire().await.unwrap();
    drop(grant);

    h.sup.shutdown().await.unwrap();
    assert_eq!(h.pool.worker_threads("mailer"), 0);
    assert_eq!(h.sup.status("mailer"), Some(WorkerStatus::Stopped));
}

#[tokio::test(start_paused = true)]
async fn test_burst_of_changes_restarts_once() {
    let dir = tempfile::tempdir().unwrap();
    let mut h = start(
        MockRuntime::new(),
        vec![
            config::with_workers("mailer", "mailer.php", 1, NO_ENV, [watched(dir.path())]),
            config::with_restart_grace(Duration::from_millis(100)),
        ],
    )
    .await
    .unwrap();
    time::sleep(Duration::from_millis(10)).await;
    assert_eq!(h.rt.runs("mailer"), 1);

    for name in ["a.php", "b.php", "nested/c.php"] {
        h.sup.notify_change(dir.path().join(name));
        time::sleep(Duration::from_millis(10)).await;
    }
    time::sleep(Duration::from_secs(1)).await;

    assert_eq!(h.rt.runs("mailer"), 2);
    assert_eq!(RecordingMetrics::get(&h.metrics.restarted), 1);
    assert_eq!(h.sup.status("mailer"), Some(WorkerStatus::Running));

    let events = drain(&mut h.events);
    let scheduled: Vec<&Event> = events
        .iter()
        .filter(|ev| ev.kind == EventKind::WorkerRestartScheduled)
        .collect();
    assert_eq!(scheduled.len(), 1);
    assert_eq!(
        scheduled[0].path.as_deref(),
        Some(dir.path().join("a.php").as_path())
    );
    assert!(events.iter().any(|ev| ev.kind == EventKind::WorkerRestarted));

    h.sup.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_unrelated_change_restarts_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let h = start(
        MockRuntime::new(),
        vec![config::with_workers(
            "mailer",
            "mailer.php",
            1,
            NO_ENV,
            [watched(dir.path())],
        )],
    )
    .await
    .unwrap();
    time::sleep(Duration::from_millis(10)).await;

    h.sup.notify_change(dir.path().join("README.md"));
    h.sup.notify_change(PathBuf::from("/somewhere/else/x.php"));
    time::sleep(Duration::from_secs(10)).await;

    assert_eq!(h.rt.runs("mailer"), 1);
    assert_eq!(RecordingMetrics::get(&h.metrics.restarted), 0);
    h.sup.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_explicit_restart() {
    let rt = MockRuntime::new();
    rt.set_mode("mailer", Mode::Complete(Duration::from_secs(3600)));
    let h = start(
        rt,
        vec![config::with_workers("mailer", "mailer.php", 1, NO_ENV, Vec::<String>::new())],
    )
    .await
    .unwrap();
    time::sleep(Duration::from_millis(10)).await;

    assert!(h.sup.restart("mailer"));
    assert!(!h.sup.restart("missing"));
    // Default restart grace is 5s.
    time::sleep(Duration::from_secs(6)).await;

    assert_eq!(h.rt.runs("mailer"), 2);
    assert_eq!(RecordingMetrics::get(&h.metrics.restarted), 1);
    h.sup.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_fatal_declaration_leaves_others_running() {
    let rt = MockRuntime::new();
    rt.set_mode("bad", Mode::Fatal);
    let mut h = start(
        rt,
        vec![
            config::with_workers("bad", "missing.php", 2, NO_ENV, Vec::<String>::new()),
            config::with_workers("good", "good.php", 1, NO_ENV, Vec::<String>::new()),
        ],
    )
    .await
    .unwrap();
    time::sleep(Duration::from_millis(100)).await;

    assert_eq!(h.sup.status("bad"), Some(WorkerStatus::Fatal));
    assert_eq!(h.sup.status("good"), Some(WorkerStatus::Running));
    assert_eq!(h.pool.worker_threads("bad"), 0);
    assert_eq!(h.pool.worker_threads("good"), 1);
    assert!(!h.sup.restart("bad"));

    let fatal = h.sup.fatal_errors();
    assert_eq!(fatal.len(), 1);
    assert!(matches!(
        &fatal[0],
        RuntimeError::WorkerFatal { worker, failures: 1, .. } if worker == "bad"
    ));

    let fatal_events = drain(&mut h.events)
        .into_iter()
        .filter(|ev| ev.kind == EventKind::WorkerFatal)
        .count();
    assert_eq!(fatal_events, 1);

    h.sup.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_rapid_failures_exhaust_the_policy() {
    let rt = MockRuntime::new();
    rt.set_mode("flaky", Mode::Fail(Duration::from_millis(10)));
    let h = start(
        rt,
        vec![
            config::with_workers("flaky", "flaky.php", 1, NO_ENV, Vec::<String>::new()),
            config::with_worker_backoff(BackoffPolicy {
                first: Duration::from_millis(20),
                max: Duration::from_millis(20),
                factor: 1.0,
                jitter: JitterPolicy::None,
            }),
            config::with_worker_failures(FailurePolicy {
                max_consecutive: 3,
                window: Duration::from_secs(60),
            }),
        ],
    )
    .await
    .unwrap();
    time::sleep(Duration::from_secs(1)).await;

    assert_eq!(h.rt.runs("flaky"), 3);
    assert_eq!(RecordingMetrics::get(&h.metrics.failed), 3);
    assert_eq!(h.sup.status("flaky"), Some(WorkerStatus::Fatal));
    assert!(matches!(
        h.sup.fatal_errors().as_slice(),
        [RuntimeError::WorkerFatal { failures: 3, .. }]
    ));
    h.sup.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_unrequested_cancel_counts_as_failure() {
    let rt = MockRuntime::new();
    rt.set_mode("quitter", Mode::SelfCancel(Duration::from_millis(10)));
    let h = start(
        rt,
        vec![
            config::with_workers("quitter", "quitter.php", 1, NO_ENV, Vec::<String>::new()),
            config::with_worker_backoff(BackoffPolicy {
                first: Duration::from_millis(20),
                max: Duration::from_millis(20),
                factor: 1.0,
                jitter: JitterPolicy::None,
            }),
            config::with_worker_failures(FailurePolicy {
                max_consecutive: 3,
                window: Duration::from_secs(60),
            }),
        ],
    )
    .await
    .unwrap();
    time::sleep(Duration::from_secs(1)).await;

    assert_eq!(h.rt.runs("quitter"), 3);
    assert_eq!(RecordingMetrics::get(&h.metrics.failed), 3);
    assert_eq!(h.sup.status("quitter"), Some(WorkerStatus::Fatal));
    assert_eq!(h.pool.worker_threads("quitter"), 0);
    h.sup.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_running_instance_marks_its_thread_executing() {
    let h = start(
        MockRuntime::new(),
        vec![config::with_workers("mailer", "mailer.php", 1, NO_ENV, Vec::<String>::new())],
    )
    .await
    .unwrap();
    time::sleep(Duration::from_millis(10)).await;

    let thread = h.rt.thread_of("mailer").unwrap();
    assert_eq!(h.pool.thread_state(thread), Some(ThreadState::Executing));

    h.sup.shutdown().await.unwrap();
    assert_eq!(h.pool.thread_state(thread), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_file_written_on_disk_restarts_once() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().canonicalize().unwrap();
    let mut h = start(
        MockRuntime::new(),
        vec![
            config::with_workers("mailer", "mailer.php", 1, NO_ENV, [watched(&root)]),
            config::with_restart_grace(Duration::from_millis(100)),
        ],
    )
    .await
    .unwrap();
    time::sleep(Duration::from_millis(300)).await;
    assert_eq!(h.rt.runs("mailer"), 1);

    std::fs::write(root.join("a.php"), "<?php echo 1;").unwrap();

    let mut scheduled = 0;
    let deadline = time::Instant::now() + Duration::from_secs(5);
    while scheduled == 0 && time::Instant::now() < deadline {
        time::sleep(Duration::from_millis(50)).await;
        scheduled += drain(&mut h.events)
            .iter()
            .filter(|ev| ev.kind == EventKind::WorkerRestartScheduled)
            .count();
    }
    assert_eq!(scheduled, 1, "no restart after writing a watched file");

    // Trailing events of the same write fall into the same burst.
    time::sleep(Duration::from_millis(600)).await;
    let late = drain(&mut h.events)
        .iter()
        .filter(|ev| ev.kind == EventKind::WorkerRestartScheduled)
        .count();
    assert_eq!(late, 0);
    assert_eq!(h.rt.runs("mailer"), 2);

    std::fs::write(root.join("notes.txt"), "not a script").unwrap();
    time::sleep(Duration::from_millis(600)).await;
    let unrelated = drain(&mut h.events)
        .iter()
        .filter(|ev| ev.kind == EventKind::WorkerRestartScheduled)
        .count();
    assert_eq!(unrelated, 0);
    assert_eq!(h.rt.runs("mailer"), 2);

    h.sup.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_completed_script_runs_again() {
    let rt = MockRuntime::new();
    rt.set_mode("cron", Mode::Complete(Duration::from_millis(50)));
    let h = start(
        rt,
        vec![config::with_workers("cron", "cron.php", 1, NO_ENV, Vec::<String>::new())],
    )
    .await
    .unwrap();
    time::sleep(Duration::from_millis(175)).await;

    assert!(h.rt.runs("cron") >= 3);
    assert_eq!(RecordingMetrics::get(&h.metrics.failed), 0);
    assert_eq!(h.sup.status("cron"), Some(WorkerStatus::Running));
    h.sup.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_reports_stuck_instances() {
    let rt = MockRuntime::new();
    rt.set_mode("stuck", Mode::Stubborn);
    let mut h = start(
        rt,
        vec![
            config::with_workers("stuck", "stuck.php", 1, NO_ENV, Vec::<String>::new()),
            config::with_workers("polite", "polite.php", 1, NO_ENV, Vec::<String>::new()),
            config::with_shutdown_grace(Duration::from_secs(1)),
        ],
    )
    .await
    .unwrap();
    time::sleep(Duration::from_millis(10)).await;

    let err = h.sup.shutdown().await.unwrap_err();
    assert_eq!(
        err,
        RuntimeError::GraceExceeded {
            grace: Duration::from_secs(1),
            stuck: vec!["stuck#0".to_string()],
        }
    );
    assert_eq!(h.pool.worker_threads("stuck"), 0);
    assert_eq!(h.pool.worker_threads("polite"), 0);

    let kinds: Vec<EventKind> = drain(&mut h.events).into_iter().map(|ev| ev.kind).collect();
    assert!(kinds.contains(&EventKind::ShutdownRequested));
    assert!(kinds.contains(&EventKind::GraceExceeded));
    assert!(!kinds.contains(&EventKind::AllStoppedWithin));
}

#[tokio::test(start_paused = true)]
async fn test_worker_thread_failure_aborts_start() {
    let rt = MockRuntime::new();
    let metrics = Arc::new(RecordingMetrics::default());
    let cfg = Arc::new(
        Config::from_options([
            config::with_num_threads(1),
            config::with_workers("mailer", "mailer.php", 2, NO_ENV, Vec::<String>::new()),
            config::with_metrics(metrics.clone()),
        ])
        .unwrap(),
    );
    let pool = ThreadPool::start(&cfg, rt.clone(), Bus::new(64)).await.unwrap();

    rt.fail_next_inits(1);
    let err = Supervisor::start(cfg, pool.clone(), rt.clone(), Bus::new(64))
        .await
        .err()
        .unwrap();

    assert!(matches!(
        err,
        StartError::Pool(PoolError::ThreadInitFailure { .. })
    ));
    assert_eq!(pool.worker_threads("mailer"), 0);
    assert_eq!(rt.runs("mailer"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_engine_lifecycle() {
    let rt = MockRuntime::new();
    let engine = Engine::from_options(
        [
            config::with_num_threads(2),
            config::with_max_threads(3),
            config::with_workers("mailer", "mailer.php", 1, [("QUEUE", "mail")], Vec::<String>::new()),
        ],
        rt.clone(),
    )
    .await
    .unwrap();
    let mut events = engine.events();
    time::sleep(Duration::from_millis(10)).await;

    assert_eq!(engine.config().effective_max_threads(), 3);
    assert_eq!(engine.pool().stats().idle, 2);
    assert_eq!(engine.pool().worker_threads("mailer"), 1);
    assert_eq!(engine.supervisor().status("mailer"), Some(WorkerStatus::Running));

    let value = engine.pool().with_thread(|_| async { 42 }).await.unwrap();
    assert_eq!(value, 42);

    engine.shutdown().await.unwrap();
    let kinds: Vec<EventKind> = drain(&mut events).into_iter().map(|ev| ev.kind).collect();
    assert!(kinds.contains(&EventKind::AllStoppedWithin));
    assert!(kinds.contains(&EventKind::PoolClosed));
    // Floor threads and the worker thread are all shut down.
    assert_eq!(rt.shutdowns(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_engine_rejects_invalid_options() {
    let err = Engine::from_options(
        [config::with_num_threads(0)],
        MockRuntime::new(),
    )
    .await
    .err()
    .unwrap();
    assert!(matches!(
        err,
        StartError::Config(ConfigError::InvalidConfig { .. })
    ));
}
