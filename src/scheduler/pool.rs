//! Render Worker Pool
//!
//! A fixed pool of named threads draining the [`RenderQueue`]. Each worker
//! owns its pixel arena (inside the executor) and reports completions as
//! typed events over a single channel. Cancelled jobs are dropped without
//! events or side effects.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;

use crate::scheduler::queue::{QueuedJob, RenderQueue, RequestId};
use crate::scheduler::{JobExecutor, SchedulerEvent};
use crate::util::CancelToken;

/// State shared between the facade and the workers.
pub(crate) struct Shared {
    pub queue: Mutex<RenderQueue>,
    pub work_available: Condvar,
    pub shutdown: AtomicBool,
    /// Jobs currently executing, by every waiter id, for abort and
    /// clear-all. Aborting any waiter of an in-flight job cancels the job.
    pub in_flight: Mutex<FxHashMap<RequestId, CancelToken>>,
    pub active: AtomicUsize,
    pub idle: Condvar,
    pub idle_lock: Mutex<()>,
    pub events: flume::Sender<SchedulerEvent>,
}

impl Shared {
    /// Blocks until no job is queued or running.
    pub fn wait_quiescent(&self) {
        let mut guard = self.idle_lock.lock();
        while self.active.load(Ordering::SeqCst) > 0 || !self.queue.lock().is_empty() {
            self.idle.wait(&mut guard);
        }
    }

    fn notify_idle(&self) {
        let _guard = self.idle_lock.lock();
        self.idle.notify_all();
    }
}

/// Spawns `count` workers over the shared queue.
pub(crate) fn spawn_workers(
    shared: &Arc<Shared>,
    executor: &Arc<dyn JobExecutor>,
    count: usize,
) -> Vec<JoinHandle<()>> {
    (0..count.max(1))
        .map(|i| {
            let shared = shared.clone();
            let executor = executor.clone();
            std::thread::Builder::new()
                .name(format!("literoom-render-{i}"))
                .spawn(move || worker_loop(&shared, executor.as_ref()))
                .expect("spawn render worker")
        })
        .collect()
}

fn worker_loop(shared: &Shared, executor: &dyn JobExecutor) {
    loop {
        // Pop and mark active under one lock so quiescence never observes
        // a job that is neither queued nor counted.
        let job = {
            let mut queue = shared.queue.lock();
            loop {
                if shared.shutdown.load(Ordering::SeqCst) {
                    return;
                }
                if let Some(job) = queue.pop() {
                    shared.active.fetch_add(1, Ordering::SeqCst);
                    break job;
                }
                shared.work_available.wait(&mut queue);
            }
        };

        let event = if job.token.is_cancelled() {
            None
        } else {
            {
                let mut in_flight = shared.in_flight.lock();
                for &waiter in &job.waiters {
                    in_flight.insert(waiter, job.token.clone());
                }
            }
            let event = run_job(executor, &job);
            {
                let mut in_flight = shared.in_flight.lock();
                for waiter in &job.waiters {
                    in_flight.remove(waiter);
                }
            }
            event
        };

        shared.active.fetch_sub(1, Ordering::SeqCst);
        shared.notify_idle();

        // A token fired mid-run means the result is discarded, not
        // delivered or cached.
        if job.token.is_cancelled() {
            continue;
        }
        if let Some(event) = event {
            if shared.events.send(event).is_err() {
                return; // receiver gone; the scheduler is shutting down
            }
        }
    }
}

fn run_job(executor: &dyn JobExecutor, job: &QueuedJob) -> Option<SchedulerEvent> {
    let result = executor.execute(job, &job.token);
    match &result {
        Err(e) if e.is_cancelled() => return None,
        Err(e) => log::warn!(
            "render failed for {} ({:?}): {e}",
            job.asset_id,
            job.operation
        ),
        Ok(_) => {}
    }
    Some(SchedulerEvent::Completed {
        request_ids: job.waiters.to_vec(),
        asset_id: job.asset_id.clone(),
        operation: job.operation,
        generation: job.edit.as_ref().map(|e| e.generation),
        result,
    })
}
