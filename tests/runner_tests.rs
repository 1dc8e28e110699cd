//! Tests for Runner
//!
//! These tests verify:
//! - End-to-end execution and the WAL trail it leaves
//! - Retry with backoff and retry exhaustion
//! - Missing definitions and panicking handlers
//! - Mutual exclusion by lock key
//! - Pool lifecycle (start/stop/restart)
//! - The registry object

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use jobwal::config::{Config, WalFormat, WalSyncStrategy};
use jobwal::job::{Job, JobState, LockPolicy};
use jobwal::registry::{Exclusive, JobOptions, Registry};
use jobwal::wal::{Entry, Event, WalStorage};
use jobwal::{JobwalError, Runner};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_runner(registry: Arc<Registry>, threads: usize) -> (TempDir, Runner) {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .max_threads(threads)
        .backoff_base(Duration::from_millis(1))
        .build()
        .unwrap();
    let runner = Runner::open(config, registry).unwrap();
    (temp_dir, runner)
}

fn entries_for(storage: &WalStorage, job_id: &str) -> Vec<Entry> {
    storage
        .replay()
        .unwrap()
        .filter(|e| e.job_id == job_id)
        .collect()
}

fn events_for(storage: &WalStorage, job_id: &str) -> Vec<Event> {
    entries_for(storage, job_id).into_iter().map(|e| e.event).collect()
}

fn job(name: &str, args: Vec<Value>) -> Job {
    Job::builder().job_name(name).positional(args).build().unwrap()
}

/// Registers `name` with a handler that records its (label, start, end)
fn register_timed(registry: &Registry, name: &str, exclusive: Exclusive) -> Arc<Mutex<Vec<(String, Instant, Instant)>>> {
    let intervals = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&intervals);
    registry.register(name, JobOptions::exclusive(exclusive), move |args| {
        let label = args[0].as_str().unwrap_or_default().to_string();
        let start = Instant::now();
        thread::sleep(Duration::from_millis(40));
        recorded.lock().push((label, start, Instant::now()));
        Ok(())
    });
    intervals
}

fn overlaps(a: &(String, Instant, Instant), b: &(String, Instant, Instant)) -> bool {
    a.1 < b.2 && b.1 < a.2
}

fn interval<'a>(all: &'a [(String, Instant, Instant)], label: &str) -> &'a (String, Instant, Instant) {
    all.iter().find(|(l, _, _)| l == label).unwrap()
}

// =============================================================================
// End-to-End Tests
// =============================================================================

#[test]
fn test_echo_end_to_end() {
    let registry = Arc::new(Registry::new());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    registry.register("echo", JobOptions::default(), move |args| {
        sink.lock().push(args[0].clone());
        Ok(())
    });

    let (_temp, runner) = setup_runner(registry, 2);
    let echo = job("echo", vec![json!(42)]);
    let job_id = echo.id().to_string();

    runner.enqueue(echo).unwrap();
    runner.start().unwrap();
    runner.stop();

    assert_eq!(*seen.lock(), vec![json!(42)]);
    assert_eq!(
        events_for(runner.storage(), &job_id),
        vec![Event::Enqueued, Event::Started, Event::Completed]
    );

    let last = entries_for(runner.storage(), &job_id).pop().unwrap();
    assert_eq!(last.state, Some(JobState::Complete));
    assert_eq!(last.data["state"], json!("complete"));
}

#[test]
fn test_enqueue_while_running() {
    let registry = Arc::new(Registry::new());
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    registry.register("count", JobOptions::default(), move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    let (_temp, runner) = setup_runner(registry, 4);
    runner.start().unwrap();

    thread::scope(|s| {
        for t in 0..4 {
            let runner = &runner;
            s.spawn(move || {
                for i in 0..10 {
                    runner.enqueue(job("count", vec![json!(t), json!(i)])).unwrap();
                }
            });
        }
    });

    runner.stop();
    assert_eq!(calls.load(Ordering::SeqCst), 40);
}

// =============================================================================
// Retry Tests
// =============================================================================

#[test]
fn test_retry_exhaustion() {
    let registry = Arc::new(Registry::new());
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    registry.register("flaky", JobOptions::default(), move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Err("boom".into())
    });

    let (_temp, runner) = setup_runner(registry, 1);
    let failing = Job::builder().job_name("flaky").max_retries(2).build().unwrap();
    let job_id = failing.id().to_string();

    runner.start().unwrap();
    runner.enqueue(failing).unwrap();

    // The requeued attempts land behind the shutdown sentinel otherwise
    let deadline = Instant::now() + Duration::from_secs(5);
    while calls.load(Ordering::SeqCst) < 3 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    runner.stop();

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(
        events_for(runner.storage(), &job_id),
        vec![
            Event::Enqueued,
            Event::Started,
            Event::Retry,
            Event::Started,
            Event::Retry,
            Event::Started,
            Event::Failed,
        ]
    );

    let last = entries_for(runner.storage(), &job_id).pop().unwrap();
    assert_eq!(last.state, Some(JobState::Failed));
    assert_eq!(last.data["retries"], json!(3));
}

#[test]
fn test_retry_then_success() {
    let registry = Arc::new(Registry::new());
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    registry.register("eventually", JobOptions::default(), move |_| {
        if counter.fetch_add(1, Ordering::SeqCst) < 2 {
            Err("not yet".into())
        } else {
            Ok(())
        }
    });

    let (_temp, runner) = setup_runner(registry, 1);
    let job = Job::builder().job_name("eventually").build().unwrap();
    let job_id = job.id().to_string();

    runner.start().unwrap();
    runner.enqueue(job).unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while events_for(runner.storage(), &job_id).last() != Some(&Event::Completed)
        && Instant::now() < deadline
    {
        thread::sleep(Duration::from_millis(5));
    }
    runner.stop();

    let entries = entries_for(runner.storage(), &job_id);
    let retries = entries.iter().filter(|e| e.event == Event::Retry).count();
    assert_eq!(retries, 2);
    assert!(entries.iter().filter(|e| e.event == Event::Retry).all(|e| e.state == Some(JobState::Queued)));
    assert_eq!(entries.last().unwrap().event, Event::Completed);
    assert_eq!(entries.last().unwrap().data["retries"], json!(2));
}

#[test]
fn test_backoff_is_exponential_and_capped() {
    let config = Config::builder()
        .backoff_base(Duration::from_millis(10))
        .max_backoff(Duration::from_millis(100))
        .build()
        .unwrap();

    assert_eq!(config.backoff_for(1), Duration::from_millis(20));
    assert_eq!(config.backoff_for(2), Duration::from_millis(40));
    assert_eq!(config.backoff_for(3), Duration::from_millis(80));
    assert_eq!(config.backoff_for(4), Duration::from_millis(100));
    assert_eq!(config.backoff_for(64), Duration::from_millis(100));
}

// =============================================================================
// Failure Handling Tests
// =============================================================================

#[test]
fn test_missing_definition_fails_without_retry() {
    let (_temp, runner) = setup_runner(Arc::new(Registry::new()), 1);
    let orphan = job("nobody-registered-this", vec![]);
    let job_id = orphan.id().to_string();

    runner.enqueue(orphan).unwrap();
    runner.start().unwrap();
    runner.stop();

    assert_eq!(
        events_for(runner.storage(), &job_id),
        vec![Event::Enqueued, Event::Started, Event::Failed]
    );
}

#[test]
fn test_panicking_handler_does_not_kill_worker() {
    let registry = Arc::new(Registry::new());
    registry.register("explode", JobOptions::default(), |_| panic!("kaboom"));
    let done = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&done);
    registry.register("ok", JobOptions::default(), move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    let (_temp, runner) = setup_runner(registry, 1);
    let bomb = Job::builder().job_name("explode").max_retries(0).build().unwrap();
    let bomb_id = bomb.id().to_string();

    runner.enqueue(bomb).unwrap();
    runner.enqueue(job("ok", vec![])).unwrap();
    runner.start().unwrap();
    runner.stop();

    assert_eq!(done.load(Ordering::SeqCst), 1);
    assert_eq!(
        events_for(runner.storage(), &bomb_id),
        vec![Event::Enqueued, Event::Started, Event::Failed]
    );
}

#[test]
fn test_panicking_lock_resolver_does_not_kill_worker() {
    let registry = Arc::new(Registry::new());
    registry.register(
        "unlockable",
        JobOptions::exclusive(Exclusive::custom(|_| panic!("no key for you"))),
        |_| Ok(()),
    );
    let done = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&done);
    registry.register("ok", JobOptions::default(), move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    let (_temp, runner) = setup_runner(registry, 1);
    let bad = job("unlockable", vec![]);
    let bad_id = bad.id().to_string();

    runner.start().unwrap();
    runner.enqueue(bad).unwrap();
    runner.enqueue(job("ok", vec![])).unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while done.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    runner.stop();

    assert_eq!(done.load(Ordering::SeqCst), 1);
    assert_eq!(
        events_for(runner.storage(), &bad_id),
        vec![Event::Enqueued, Event::Started, Event::Failed]
    );
    assert_eq!(runner.active_locks(), 0);
}

#[cfg(target_os = "linux")]
#[test]
fn test_enqueue_propagates_wal_write_error() {
    // Every write to /dev/full fails with ENOSPC
    let full = std::path::Path::new("/dev/full");
    if !full.exists() {
        return;
    }

    let storage = WalStorage::open(full, WalSyncStrategy::EveryWrite, WalFormat::Json).unwrap();
    let runner = Runner::with_storage(Config::default(), Arc::new(Registry::new()), Arc::new(storage));

    let result = runner.enqueue(job("echo", vec![json!(1)]));

    assert!(matches!(result, Err(JobwalError::Io(_))));
    assert_eq!(runner.pending(), 0);
}

#[test]
fn test_enqueue_rejects_finished_job() {
    let (_temp, runner) = setup_runner(Arc::new(Registry::new()), 1);
    let mut finished = job("echo", vec![]);
    finished.mark_running().unwrap();
    finished.mark_complete().unwrap();

    assert!(matches!(runner.enqueue(finished), Err(JobwalError::InvalidJob(_))));
    assert_eq!(runner.pending(), 0);
}

// =============================================================================
// Mutual Exclusion Tests
// =============================================================================

#[test]
fn test_field_lock_serializes_same_key() {
    let registry = Arc::new(Registry::new());
    let intervals = register_timed(&registry, "touch", Exclusive::Field("resource".to_string()));

    let (_temp, runner) = setup_runner(registry, 3);
    for (label, resource) in [("a", "db"), ("b", "db"), ("c", "cache")] {
        let job = Job::builder()
            .job_name("touch")
            .positional([json!(label)])
            .arg("resource", resource)
            .build()
            .unwrap();
        runner.enqueue(job).unwrap();
    }
    runner.start().unwrap();
    runner.stop();

    let all = intervals.lock();
    assert_eq!(all.len(), 3);
    assert!(!overlaps(interval(&all, "a"), interval(&all, "b")));
    let other_key = interval(&all, "c");
    assert!(overlaps(other_key, interval(&all, "a")) || overlaps(other_key, interval(&all, "b")));
    assert_eq!(runner.active_locks(), 0);
}

#[test]
fn test_whole_job_lock() {
    let registry = Arc::new(Registry::new());
    let intervals = register_timed(&registry, "single", Exclusive::WholeJob);

    let (_temp, runner) = setup_runner(registry, 4);
    for label in ["a", "b", "c", "d"] {
        runner.enqueue(job("single", vec![json!(label)])).unwrap();
    }
    runner.start().unwrap();
    runner.stop();

    let all = intervals.lock();
    assert_eq!(all.len(), 4);
    for (i, first) in all.iter().enumerate() {
        for second in all.iter().skip(i + 1) {
            assert!(!overlaps(first, second), "{} overlapped {}", first.0, second.0);
        }
    }
}

#[test]
fn test_custom_resolver_lock() {
    let registry = Arc::new(Registry::new());
    let intervals = register_timed(
        &registry,
        "bill",
        Exclusive::custom(|args| {
            args.get("account")
                .and_then(Value::as_str)
                .map(|account| format!("account:{}", account))
        }),
    );

    let (_temp, runner) = setup_runner(registry, 2);
    for label in ["first", "second"] {
        let job = Job::builder()
            .job_name("bill")
            .positional([json!(label)])
            .arg("account", "42")
            .build()
            .unwrap();
        runner.enqueue(job).unwrap();
    }
    runner.start().unwrap();
    runner.stop();

    let all = intervals.lock();
    assert!(!overlaps(interval(&all, "first"), interval(&all, "second")));
}

#[test]
fn test_job_level_lock_policy() {
    let registry = Arc::new(Registry::new());
    let intervals = register_timed(&registry, "plain", Exclusive::None);

    let (_temp, runner) = setup_runner(registry, 2);
    for label in ["x", "y"] {
        let job = Job::builder()
            .job_name("plain")
            .positional([json!(label)])
            .exclusive(LockPolicy::WholeJob)
            .build()
            .unwrap();
        runner.enqueue(job).unwrap();
    }
    runner.start().unwrap();
    runner.stop();

    let all = intervals.lock();
    assert!(!overlaps(interval(&all, "x"), interval(&all, "y")));
}

#[test]
fn test_pool_bounds_concurrency() {
    let registry = Arc::new(Registry::new());
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    {
        let active = Arc::clone(&active);
        let peak = Arc::clone(&peak);
        registry.register("work", JobOptions::default(), move |_| {
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(20));
            active.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        });
    }

    let (_temp, runner) = setup_runner(registry, 2);
    for i in 0..6 {
        runner.enqueue(job("work", vec![json!(i)])).unwrap();
    }
    runner.start().unwrap();
    runner.stop();

    assert!(peak.load(Ordering::SeqCst) <= 2);
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[test]
fn test_start_twice_is_an_error() {
    let (_temp, runner) = setup_runner(Arc::new(Registry::new()), 1);

    runner.start().unwrap();
    assert!(runner.is_running());
    assert!(matches!(runner.start(), Err(JobwalError::AlreadyRunning)));

    runner.stop();
    assert!(!runner.is_running());
}

#[test]
fn test_stop_without_start_is_noop() {
    let (_temp, runner) = setup_runner(Arc::new(Registry::new()), 1);
    runner.stop();
    assert!(!runner.is_running());
}

#[test]
fn test_jobs_enqueued_while_stopped_run_on_next_start() {
    let registry = Arc::new(Registry::new());
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    registry.register("count", JobOptions::default(), move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    let (_temp, runner) = setup_runner(registry, 2);
    runner.start().unwrap();
    runner.stop();

    runner.enqueue(job("count", vec![])).unwrap();
    assert_eq!(runner.pending(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    runner.start().unwrap();
    runner.stop();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(runner.pending(), 0);
}

#[test]
fn test_checkpoint_after_run_empties_log() {
    let registry = Arc::new(Registry::new());
    registry.register("noop", JobOptions::default(), |_| Ok(()));

    let (_temp, runner) = setup_runner(registry, 2);
    for i in 0..5 {
        runner.enqueue(job("noop", vec![json!(i)])).unwrap();
    }
    runner.start().unwrap();
    runner.stop();

    let stats = runner.checkpoint().unwrap();
    assert_eq!(stats.entries_before, 15);
    assert_eq!(stats.entries_after, 0);
    assert_eq!(stats.jobs_dropped, 5);
    assert_eq!(runner.storage().replay().unwrap().count(), 0);
}

#[test]
fn test_job_builder_uses_configured_retries() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .default_max_retries(7)
        .build()
        .unwrap();
    let runner = Runner::open(config, Arc::new(Registry::new())).unwrap();

    let job = runner.job_builder().job_name("echo").build().unwrap();
    assert_eq!(job.max_retries(), 7);
    assert!(temp_dir.path().join("jobs.wal").exists());
}

#[test]
fn test_invalid_config_is_rejected() {
    assert!(matches!(
        Config::builder().max_threads(0).build(),
        Err(JobwalError::Config(_))
    ));
}

// =============================================================================
// Registry Tests
// =============================================================================

#[test]
fn test_registry_operations() {
    let registry = Registry::new();
    assert!(registry.is_empty());

    registry.register("b", JobOptions::default(), |_| Ok(()));
    registry.register("a", JobOptions::exclusive(Exclusive::WholeJob), |_| Ok(()));
    assert_eq!(registry.len(), 2);
    assert_eq!(registry.names(), vec!["a", "b"]);

    let a = registry.lookup("a").unwrap();
    assert_eq!(a.name(), "a");
    assert!(matches!(a.options().exclusive, Exclusive::WholeJob));
    assert!(a.call(&[]).is_ok());
    assert!(registry.lookup("missing").is_none());

    assert!(registry.unregister("b").is_some());
    assert!(registry.lookup("b").is_none());

    registry.clear();
    assert!(registry.is_empty());
}

#[test]
fn test_registry_replaces_definition() {
    let registry = Registry::new();
    registry.register("x", JobOptions::default(), |_| Err("old".into()));
    registry.register("x", JobOptions::default(), |_| Ok(()));

    assert_eq!(registry.len(), 1);
    assert!(registry.lookup("x").unwrap().call(&[]).is_ok());
}
