//! Priority Scheduler
//!
//! Deduplicating priority queue plus a fixed worker pool for thumbnail,
//! preview, and edit renders. Completions stream to a single receiver as
//! typed [`SchedulerEvent`]s; callers must treat event order as completion
//! order, not enqueue order, and guard against staleness before applying
//! results.

pub mod pool;
pub mod queue;
pub mod viewport;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;

use crate::catalog::model::{AssetId, RenderKind};
use crate::errors::Result;
use crate::pipeline::histogram::HistogramData;
use crate::settings::EngineSettings;
use crate::util::CancelToken;

pub use queue::{EditRenderPayload, Enqueued, QueuedJob, RenderQueue, RequestId};
pub use viewport::{ScrollDirection, Viewport};

/// The kinds of work the scheduler runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Thumbnail,
    Preview1x,
    Preview2x,
    EditRender,
}

impl Operation {
    /// The cached render product this operation produces, if any. Edit
    /// renders go straight to the coordinator, never to the blob store.
    #[must_use]
    pub fn render_kind(self) -> Option<RenderKind> {
        match self {
            Operation::Thumbnail => Some(RenderKind::Thumbnail),
            Operation::Preview1x => Some(RenderKind::Preview1x),
            Operation::Preview2x => Some(RenderKind::Preview2x),
            Operation::EditRender => None,
        }
    }
}

/// Request urgency; lower numbers run sooner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Visible = 0,
    NearVisible = 1,
    Preload = 2,
    Background = 3,
}

/// What a completed job produced.
#[derive(Debug)]
pub struct JobOutput {
    /// Blob-store key, for cached render kinds.
    pub blob_key: Option<String>,
    /// Encoded bytes, for edit renders delivered straight to the UI.
    pub bytes: Option<Arc<Vec<u8>>>,
    pub width: u32,
    pub height: u32,
    pub histogram: Option<HistogramData>,
    /// The tier an edit render ran at, for draft/full routing.
    pub edit_tier: Option<crate::pipeline::runner::RenderTier>,
}

/// Completion event delivered on the scheduler's single event channel.
#[derive(Debug)]
pub enum SchedulerEvent {
    Completed {
        /// Every request id that was waiting on this job; each callback
        /// fires exactly once.
        request_ids: Vec<RequestId>,
        asset_id: AssetId,
        operation: Operation,
        /// Edit-render generation, for staleness checks.
        generation: Option<u64>,
        result: Result<JobOutput>,
    },
}

/// Executes one popped job. Implemented by the engine, which wires the
/// pipeline runner, blob store, and asset index together.
pub trait JobExecutor: Send + Sync {
    fn execute(&self, job: &QueuedJob, token: &CancelToken) -> Result<JobOutput>;
}

/// Handle returned from [`Scheduler::enqueue`].
pub struct RequestHandle {
    pub id: RequestId,
    pub token: CancelToken,
    pub deduplicated: bool,
}

/// The scheduler facade: queue + worker pool + event channel.
pub struct Scheduler {
    shared: Arc<pool::Shared>,
    events_rx: flume::Receiver<SchedulerEvent>,
    workers: Vec<JoinHandle<()>>,
}

impl Scheduler {
    #[must_use]
    pub fn new(settings: &EngineSettings, executor: Arc<dyn JobExecutor>) -> Self {
        let (events_tx, events_rx) = flume::unbounded();
        let shared = Arc::new(pool::Shared {
            queue: Mutex::new(RenderQueue::new(settings.queue_cap)),
            work_available: Condvar::new(),
            shutdown: AtomicBool::new(false),
            in_flight: Mutex::new(FxHashMap::default()),
            active: AtomicUsize::new(0),
            idle: Condvar::new(),
            idle_lock: Mutex::new(()),
            events: events_tx,
        });
        let workers = pool::spawn_workers(&shared, &executor, settings.thumbnail_workers);
        Self {
            shared,
            events_rx,
            workers,
        }
    }

    /// The single completion-event receiver. The coordinator owns draining
    /// it.
    #[must_use]
    pub fn events(&self) -> &flume::Receiver<SchedulerEvent> {
        &self.events_rx
    }

    /// Queues (or deduplicates onto) a render request.
    pub fn enqueue(
        &self,
        asset_id: AssetId,
        operation: Operation,
        priority: Priority,
        edit: Option<EditRenderPayload>,
    ) -> RequestHandle {
        let enqueued = {
            let mut queue = self.shared.queue.lock();
            queue.enqueue(asset_id, operation, priority, edit)
        };
        for evicted in &enqueued.evicted {
            log::debug!(
                "queue cap evicted {} ({:?})",
                evicted.asset_id,
                evicted.operation
            );
            evicted.token.cancel();
        }
        self.shared.work_available.notify_one();
        RequestHandle {
            id: enqueued.id,
            token: enqueued.token,
            deduplicated: enqueued.deduplicated,
        }
    }

    /// Aborts one request. Queued-only waiters detach immediately; the last
    /// waiter removes the queued job; an in-flight job has its token
    /// cancelled and will be discarded without callbacks.
    pub fn abort(&self, id: RequestId) {
        let removed = self.shared.queue.lock().abort(id);
        if let Some(job) = removed {
            job.token.cancel();
            return;
        }
        if let Some(token) = self.shared.in_flight.lock().get(&id) {
            token.cancel();
        }
    }

    /// Cancels everything — queued and in-flight — and blocks until the
    /// workers are quiescent. Used on folder change.
    pub fn clear_all(&self) {
        let drained = self.shared.queue.lock().drain_all();
        for job in &drained {
            job.token.cancel();
        }
        for token in self.shared.in_flight.lock().values() {
            token.cancel();
        }
        self.shared.work_available.notify_all();
        self.shared.wait_quiescent();
    }

    /// Applies a viewport move to queued priorities.
    ///
    /// `order` is the current grid ordering; queued jobs for assets in it
    /// take the viewport-derived priority for their index.
    pub fn reprioritize(&self, viewport: &Viewport, order: &[AssetId], operation: Operation) {
        let positions: FxHashMap<&str, usize> = order
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();
        self.shared.queue.lock().reprioritize(|asset_id, op| {
            if op != operation {
                return None;
            }
            positions
                .get(asset_id.as_str())
                .map(|&idx| viewport.priority_for_index(idx))
        });
    }

    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.shared.queue.lock().len()
    }

    /// Blocks until all queued and running work has finished.
    pub fn wait_quiescent(&self) {
        self.shared.wait_quiescent();
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        // Wake sleeping workers so they observe the flag.
        self.shared.work_available.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}
