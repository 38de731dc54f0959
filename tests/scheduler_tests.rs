//! Scheduler Conformance Tests
//!
//! Tests for:
//! - Fairness within a priority level (FIFO by enqueue order)
//! - Deduplication: one execution, every waiter notified once
//! - Cancellation atomicity: no callbacks after abort
//! - Clear-all quiescence on folder change
//! - Viewport churn: moved viewport work is served first, evicted work
//!   never runs

use std::sync::Arc;
use std::time::Duration;

use literoom::scheduler::{
    JobExecutor, JobOutput, Operation, Priority, QueuedJob, Scheduler, SchedulerEvent,
    ScrollDirection, Viewport,
};
use literoom::{CancelToken, EngineSettings};
use parking_lot::Mutex;

/// Executor that parks every job until a gate permit arrives (checking its
/// cancellation token while parked, the way a real pipeline stage does) and
/// records execution order.
struct GateExecutor {
    gate: flume::Receiver<()>,
    executed: Mutex<Vec<String>>,
}

impl GateExecutor {
    fn new() -> (Arc<Self>, flume::Sender<()>) {
        let (tx, rx) = flume::unbounded();
        (
            Arc::new(Self {
                gate: rx,
                executed: Mutex::new(Vec::new()),
            }),
            tx,
        )
    }
}

impl JobExecutor for GateExecutor {
    fn execute(&self, job: &QueuedJob, token: &CancelToken) -> literoom::Result<JobOutput> {
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        loop {
            token.check()?;
            if self.gate.recv_timeout(Duration::from_millis(5)).is_ok() {
                break;
            }
            assert!(std::time::Instant::now() < deadline, "gate starved");
        }
        token.check()?;
        self.executed.lock().push(job.asset_id.clone());
        Ok(JobOutput {
            blob_key: None,
            bytes: None,
            width: 0,
            height: 0,
            histogram: None,
            edit_tier: None,
        })
    }
}

fn settings() -> EngineSettings {
    EngineSettings {
        thumbnail_workers: 1,
        ..Default::default()
    }
}

fn drain_completions(scheduler: &Scheduler) -> Vec<(Vec<String>, String)> {
    scheduler.wait_quiescent();
    let mut out = Vec::new();
    while let Ok(event) = scheduler.events().try_recv() {
        let SchedulerEvent::Completed {
            request_ids,
            asset_id,
            ..
        } = event;
        out.push((
            request_ids.iter().map(|id| format!("{id:?}")).collect(),
            asset_id,
        ));
    }
    out
}

// ============================================================================
// Fairness within a priority
// ============================================================================

#[test]
fn fifo_within_a_priority_level() {
    let (executor, gate) = GateExecutor::new();
    let scheduler = Scheduler::new(&settings(), executor.clone());

    // Occupy the single worker so the rest queue up in order.
    scheduler.enqueue("first".into(), Operation::Thumbnail, Priority::Preload, None);
    std::thread::sleep(Duration::from_millis(50));
    for name in ["a", "b", "c", "d"] {
        scheduler.enqueue(name.into(), Operation::Thumbnail, Priority::Preload, None);
    }
    for _ in 0..5 {
        gate.send(()).unwrap();
    }
    scheduler.wait_quiescent();

    let executed = executor.executed.lock().clone();
    assert_eq!(executed, vec!["first", "a", "b", "c", "d"]);
}

#[test]
fn lower_priority_number_runs_first() {
    let (executor, gate) = GateExecutor::new();
    let scheduler = Scheduler::new(&settings(), executor.clone());

    scheduler.enqueue("hold".into(), Operation::Thumbnail, Priority::Background, None);
    std::thread::sleep(Duration::from_millis(50));
    scheduler.enqueue("bg".into(), Operation::Thumbnail, Priority::Background, None);
    scheduler.enqueue("visible".into(), Operation::Thumbnail, Priority::Visible, None);
    scheduler.enqueue("near".into(), Operation::Thumbnail, Priority::NearVisible, None);

    for _ in 0..4 {
        gate.send(()).unwrap();
    }
    scheduler.wait_quiescent();

    let executed = executor.executed.lock().clone();
    assert_eq!(executed, vec!["hold", "visible", "near", "bg"]);
}

// ============================================================================
// Deduplication
// ============================================================================

#[test]
fn duplicate_requests_execute_once_and_notify_all_waiters() {
    let (executor, gate) = GateExecutor::new();
    let scheduler = Scheduler::new(&settings(), executor.clone());

    scheduler.enqueue("hold".into(), Operation::Thumbnail, Priority::Background, None);
    std::thread::sleep(Duration::from_millis(50));

    let first = scheduler.enqueue("dup".into(), Operation::Thumbnail, Priority::Preload, None);
    let len_before = scheduler.queue_len();
    let second = scheduler.enqueue("dup".into(), Operation::Thumbnail, Priority::Visible, None);
    assert!(second.deduplicated);
    assert_eq!(scheduler.queue_len(), len_before, "dedup must not grow the queue");
    assert_ne!(first.id, second.id);

    for _ in 0..2 {
        gate.send(()).unwrap();
    }
    let completions = drain_completions(&scheduler);

    // One execution of "dup"...
    assert_eq!(executor.executed.lock().iter().filter(|a| *a == "dup").count(), 1);
    // ...whose completion event carries both waiter ids.
    let dup_event = completions.iter().find(|(_, asset)| asset == "dup").unwrap();
    assert_eq!(dup_event.0.len(), 2);
}

// ============================================================================
// Cancellation atomicity
// ============================================================================

#[test]
fn aborted_request_never_calls_back() {
    let (executor, gate) = GateExecutor::new();
    let scheduler = Scheduler::new(&settings(), executor.clone());

    scheduler.enqueue("hold".into(), Operation::Thumbnail, Priority::Background, None);
    std::thread::sleep(Duration::from_millis(50));
    let doomed = scheduler.enqueue("doomed".into(), Operation::Thumbnail, Priority::Visible, None);
    scheduler.abort(doomed.id);

    for _ in 0..2 {
        gate.send(()).unwrap();
    }
    let completions = drain_completions(&scheduler);

    assert!(completions.iter().all(|(_, asset)| asset != "doomed"));
    assert!(executor.executed.lock().iter().all(|a| a != "doomed"));
}

#[test]
fn abort_of_in_flight_work_discards_its_result() {
    let (executor, gate) = GateExecutor::new();
    let scheduler = Scheduler::new(&settings(), executor.clone());

    let running = scheduler.enqueue("running".into(), Operation::Thumbnail, Priority::Visible, None);
    std::thread::sleep(Duration::from_millis(50)); // worker picks it up, parks on gate
    scheduler.abort(running.id);
    drop(gate);

    let completions = drain_completions(&scheduler);
    assert!(completions.is_empty(), "aborted in-flight work must not call back");
}

// ============================================================================
// Clear-all
// ============================================================================

#[test]
fn clear_all_reaches_quiescence_without_events() {
    let (executor, gate) = GateExecutor::new();
    let scheduler = Scheduler::new(&settings(), executor.clone());

    for i in 0..10 {
        scheduler.enqueue(format!("asset-{i}"), Operation::Thumbnail, Priority::Preload, None);
    }
    std::thread::sleep(Duration::from_millis(50));
    // No permits: the in-flight job is parked; cancellation must unpark it.
    scheduler.clear_all();
    drop(gate);

    assert_eq!(scheduler.queue_len(), 0);
    let completions: Vec<_> = scheduler.events().try_iter().collect();
    assert!(completions.is_empty(), "cleared work must not call back");
}

// ============================================================================
// Viewport churn
// ============================================================================

#[test]
fn viewport_move_serves_new_window_first_and_caps_total_work() {
    let (executor, gate) = GateExecutor::new();
    let settings = EngineSettings {
        thumbnail_workers: 1,
        queue_cap: 200,
        ..Default::default()
    };
    let scheduler = Scheduler::new(&settings, executor.clone());

    // Occupy the worker, then flood with 1000 background thumbnails.
    scheduler.enqueue("hold".into(), Operation::Thumbnail, Priority::Background, None);
    std::thread::sleep(Duration::from_millis(50));

    let order: Vec<String> = (0..1000).map(|i| format!("asset-{i:04}")).collect();
    for id in &order {
        scheduler.enqueue(id.clone(), Operation::Thumbnail, Priority::Background, None);
    }
    assert!(scheduler.queue_len() <= 200, "queue must honour its cap");

    // The user scrolls to 500..550: the UI re-requests the visible window
    // and re-maps queued priorities.
    let viewport = Viewport {
        start: 500,
        end: 550,
        items_per_screen: 50,
        direction: ScrollDirection::Forward,
    };
    for id in &order[500..=550] {
        scheduler.enqueue(id.clone(), Operation::Thumbnail, Priority::Visible, None);
    }
    scheduler.reprioritize(&viewport, &order, Operation::Thumbnail);

    for _ in 0..500 {
        gate.send(()).unwrap();
    }
    scheduler.wait_quiescent();

    let executed = executor.executed.lock().clone();
    // Everything that ran fits inside the cap (plus the held job).
    assert!(executed.len() <= 202, "ran {} jobs", executed.len());

    // The first post-hold completions are exactly the new visible window.
    let after_hold: Vec<&String> = executed.iter().skip(1).take(51).collect();
    for id in after_hold {
        let index: usize = id.trim_start_matches("asset-").parse().unwrap();
        assert!(
            (500..=550).contains(&index),
            "expected visible-window work first, got {id}"
        );
    }
}
