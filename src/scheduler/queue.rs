//! Deduplicating Priority Queue
//!
//! Queue policy only — no threads here. Requests dedup on
//! `(asset, operation)` with priority upgrades, extraction scans for the
//! best `(priority, enqueue-sequence)` pair lazily, and a size cap evicts
//! the worst entries. The worker pool in [`super::pool`] drives it.

use rustc_hash::FxHashMap;
use smallvec::{SmallVec, smallvec};
use uuid::Uuid;

use crate::catalog::edit::EditState;
use crate::catalog::model::AssetId;
use crate::pipeline::runner::RenderTier;
use crate::scheduler::{Operation, Priority};
use crate::util::CancelToken;

/// Identifier handed back for every enqueue, including deduplicated ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

/// Payload for edit renders: the exact document snapshot to render.
#[derive(Debug, Clone)]
pub struct EditRenderPayload {
    pub edit: EditState,
    pub tier: RenderTier,
    /// Coordinator generation; stale completions are dropped against it.
    pub generation: u64,
}

/// One queued unit of work.
#[derive(Debug)]
pub struct QueuedJob {
    pub id: RequestId,
    pub asset_id: AssetId,
    pub operation: Operation,
    pub priority: Priority,
    pub seq: u64,
    pub token: CancelToken,
    /// Every request id waiting on this job (the original plus chained
    /// duplicates). Each fires exactly once on completion.
    pub waiters: SmallVec<[RequestId; 2]>,
    pub edit: Option<EditRenderPayload>,
}

/// What an enqueue did.
pub struct Enqueued {
    pub id: RequestId,
    pub token: CancelToken,
    /// True when the request chained onto an existing queue entry.
    pub deduplicated: bool,
    /// Jobs evicted to honour the queue cap; the caller cancels them.
    pub evicted: Vec<QueuedJob>,
}

/// The queue proper.
pub struct RenderQueue {
    items: Vec<QueuedJob>,
    lookup: FxHashMap<(AssetId, Operation), RequestId>,
    next_seq: u64,
    cap: usize,
}

impl RenderQueue {
    #[must_use]
    pub fn new(cap: usize) -> Self {
        Self {
            items: Vec::new(),
            lookup: FxHashMap::default(),
            next_seq: 0,
            cap: cap.max(1),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Adds a request, deduplicating against queued work.
    ///
    /// A duplicate chains its callback onto the existing entry; a duplicate
    /// with a better (lower) priority upgrades it. Edit renders always adopt
    /// the newest payload, so a chained request renders the latest document.
    pub fn enqueue(
        &mut self,
        asset_id: AssetId,
        operation: Operation,
        priority: Priority,
        edit: Option<EditRenderPayload>,
    ) -> Enqueued {
        let key = (asset_id.clone(), operation);
        if let Some(&existing_id) = self.lookup.get(&key) {
            if let Some(job) = self.items.iter_mut().find(|j| j.id == existing_id) {
                let id = RequestId::new();
                job.waiters.push(id);
                if priority < job.priority {
                    job.priority = priority;
                }
                if edit.is_some() {
                    job.edit = edit;
                }
                return Enqueued {
                    id,
                    token: job.token.clone(),
                    deduplicated: true,
                    evicted: Vec::new(),
                };
            }
        }

        let id = RequestId::new();
        let token = CancelToken::new();
        self.next_seq += 1;
        self.items.push(QueuedJob {
            id,
            asset_id,
            operation,
            priority,
            seq: self.next_seq,
            token: token.clone(),
            waiters: smallvec![id],
            edit,
        });
        self.lookup.insert(key, id);

        let evicted = self.evict_over_cap();
        Enqueued {
            id,
            token,
            deduplicated: false,
            evicted,
        }
    }

    /// Extracts the next job: lowest priority number first, FIFO within a
    /// level. The scan happens here — enqueue never sorts.
    pub fn pop(&mut self) -> Option<QueuedJob> {
        let best = self
            .items
            .iter()
            .enumerate()
            .min_by_key(|(_, job)| (job.priority, job.seq))
            .map(|(idx, _)| idx)?;
        let job = self.items.swap_remove(best);
        self.lookup.remove(&(job.asset_id.clone(), job.operation));
        Some(job)
    }

    /// Detaches one waiter; removes the job when nobody is left waiting.
    /// Returns the job if it was fully removed.
    pub fn abort(&mut self, id: RequestId) -> Option<QueuedJob> {
        let idx = self.items.iter().position(|j| j.waiters.contains(&id))?;
        let job = &mut self.items[idx];
        job.waiters.retain(|w| *w != id);
        if !job.waiters.is_empty() {
            return None;
        }
        let job = self.items.swap_remove(idx);
        self.lookup.remove(&(job.asset_id.clone(), job.operation));
        Some(job)
    }

    /// Empties the queue, returning everything for cancellation.
    pub fn drain_all(&mut self) -> Vec<QueuedJob> {
        self.lookup.clear();
        std::mem::take(&mut self.items)
    }

    /// Re-maps priorities (viewport moved). Jobs the mapper declines keep
    /// their current priority.
    pub fn reprioritize(&mut self, mut f: impl FnMut(&AssetId, Operation) -> Option<Priority>) {
        for job in &mut self.items {
            if let Some(priority) = f(&job.asset_id, job.operation) {
                job.priority = priority;
            }
        }
    }

    fn evict_over_cap(&mut self) -> Vec<QueuedJob> {
        let mut evicted = Vec::new();
        while self.items.len() > self.cap {
            let Some(worst) = self
                .items
                .iter()
                .enumerate()
                .max_by_key(|(_, job)| (job.priority, job.seq))
                .map(|(idx, _)| idx)
            else {
                break;
            };
            let job = self.items.swap_remove(worst);
            self.lookup.remove(&(job.asset_id.clone(), job.operation));
            evicted.push(job);
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enqueue(queue: &mut RenderQueue, asset: &str, priority: Priority) -> Enqueued {
        queue.enqueue(asset.to_string(), Operation::Thumbnail, priority, None)
    }

    #[test]
    fn fifo_within_priority() {
        let mut queue = RenderQueue::new(10);
        enqueue(&mut queue, "a", Priority::Preload);
        enqueue(&mut queue, "b", Priority::Preload);
        enqueue(&mut queue, "c", Priority::Visible);

        assert_eq!(queue.pop().unwrap().asset_id, "c");
        assert_eq!(queue.pop().unwrap().asset_id, "a");
        assert_eq!(queue.pop().unwrap().asset_id, "b");
        assert!(queue.pop().is_none());
    }

    #[test]
    fn duplicate_never_grows_queue_and_upgrades_priority() {
        let mut queue = RenderQueue::new(10);
        enqueue(&mut queue, "a", Priority::Background);
        enqueue(&mut queue, "b", Priority::NearVisible);
        let second = enqueue(&mut queue, "a", Priority::Visible);

        assert!(second.deduplicated);
        assert_eq!(queue.len(), 2);
        // Upgrade pulled "a" ahead of "b".
        let job = queue.pop().unwrap();
        assert_eq!(job.asset_id, "a");
        assert_eq!(job.waiters.len(), 2);
    }

    #[test]
    fn cap_evicts_worst_priority() {
        let mut queue = RenderQueue::new(2);
        enqueue(&mut queue, "a", Priority::Visible);
        enqueue(&mut queue, "b", Priority::Background);
        let third = enqueue(&mut queue, "c", Priority::NearVisible);

        assert_eq!(queue.len(), 2);
        assert_eq!(third.evicted.len(), 1);
        assert_eq!(third.evicted[0].asset_id, "b");
    }

    #[test]
    fn abort_of_sole_waiter_removes_job() {
        let mut queue = RenderQueue::new(10);
        let first = enqueue(&mut queue, "a", Priority::Visible);
        let removed = queue.abort(first.id).unwrap();
        assert_eq!(removed.asset_id, "a");
        assert!(queue.is_empty());
    }

    #[test]
    fn abort_of_chained_waiter_keeps_job() {
        let mut queue = RenderQueue::new(10);
        enqueue(&mut queue, "a", Priority::Visible);
        let dup = enqueue(&mut queue, "a", Priority::Visible);
        assert!(queue.abort(dup.id).is_none());
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pop().unwrap().waiters.len(), 1);
    }
}
