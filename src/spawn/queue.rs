//! Priority staging queue for pending spawn work.
//!
//! A max-priority heap (lowest ordinal first, FIFO within a priority) with
//! duplicate suppression for named-character requests. Zone and random
//! requests carry no identity yet and always enter.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use parking_lot::Mutex;
use rustc_hash::FxHashSet;

use crate::spawn::request::{PrioritySpawnRequest, SpawnPriority};
use crate::world::ids::{CharacterGuid, ZoneId};

/// Snapshot of queue state for telemetry.
#[derive(Debug, Clone, Default)]
pub struct QueueMetrics {
    pub depth: usize,
    pub depth_by_priority: [usize; 4],
    pub dequeued_total: u64,
    /// Mean time spent queued, over everything dequeued so far.
    pub avg_wait_ms: u64,
}

struct QueueInner {
    heap: BinaryHeap<Reverse<PrioritySpawnRequest>>,
    indexed: FxHashSet<CharacterGuid>,
    dequeued_total: u64,
    total_wait_ms: u64,
}

/// Ordered staging area with duplicate suppression.
pub struct SpawnQueue {
    inner: Mutex<QueueInner>,
}

impl SpawnQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                heap: BinaryHeap::new(),
                indexed: FxHashSet::default(),
                dequeued_total: 0,
                total_wait_ms: 0,
            }),
        }
    }

    /// Accept a request. A named-character request already present in the
    /// duplicate index is silently rejected with `false`.
    pub fn enqueue(&self, mut req: PrioritySpawnRequest, now_ms: u64) -> bool {
        let mut inner = self.inner.lock();

        // Only requests with an explicit character identity participate in
        // duplicate detection.
        if let Some(guid) = req.request.character {
            if !inner.indexed.insert(guid) {
                return false;
            }
        }

        if req.enqueue_time_ms == 0 {
            req.enqueue_time_ms = now_ms;
        }
        inner.heap.push(Reverse(req));
        true
    }

    /// Pop the highest-priority, oldest request.
    pub fn dequeue(&self, now_ms: u64) -> Option<PrioritySpawnRequest> {
        let mut inner = self.inner.lock();
        let Reverse(req) = inner.heap.pop()?;
        if let Some(guid) = req.request.character {
            inner.indexed.remove(&guid);
        }
        inner.dequeued_total += 1;
        inner.total_wait_ms += now_ms.saturating_sub(req.enqueue_time_ms);
        Some(req)
    }

    /// Drop a queued named-character request. O(n): rebuilds the heap.
    pub fn remove(&self, guid: CharacterGuid) -> bool {
        let mut inner = self.inner.lock();
        if !inner.indexed.remove(&guid) {
            return false;
        }
        let drained = std::mem::take(&mut inner.heap);
        inner.heap = drained
            .into_iter()
            .filter(|Reverse(req)| req.request.character != Some(guid))
            .collect();
        true
    }

    pub fn contains(&self, guid: CharacterGuid) -> bool {
        self.inner.lock().indexed.contains(&guid)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().heap.is_empty()
    }

    /// Queued anonymous spawn requests headed for a zone. Reconciliation
    /// subtracts these from a zone's deficit so repeated passes do not
    /// overshoot the target.
    pub fn pending_for_zone(&self, zone: ZoneId) -> usize {
        self.inner
            .lock()
            .heap
            .iter()
            .filter(|Reverse(req)| {
                req.request.zone == Some(zone) && req.request.character.is_none()
            })
            .count()
    }

    pub fn len_by_priority(&self, priority: SpawnPriority) -> usize {
        self.inner
            .lock()
            .heap
            .iter()
            .filter(|Reverse(req)| req.priority == priority)
            .count()
    }

    pub fn metrics(&self) -> QueueMetrics {
        let inner = self.inner.lock();
        let mut by_priority = [0usize; 4];
        for Reverse(req) in inner.heap.iter() {
            by_priority[req.priority as usize] += 1;
        }
        QueueMetrics {
            depth: inner.heap.len(),
            depth_by_priority: by_priority,
            dequeued_total: inner.dequeued_total,
            avg_wait_ms: if inner.dequeued_total > 0 {
                inner.total_wait_ms / inner.dequeued_total
            } else {
                0
            },
        }
    }
}

impl Default for SpawnQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spawn::request::SpawnRequest;

    fn zone_req(zone: u32) -> PrioritySpawnRequest {
        PrioritySpawnRequest::new(SpawnRequest::for_zone(zone, 0), "test")
    }

    fn named_req(counter: u64) -> PrioritySpawnRequest {
        PrioritySpawnRequest::new(
            SpawnRequest::for_character(CharacterGuid::player(counter)),
            "test",
        )
    }

    #[test]
    fn test_priority_order() {
        let queue = SpawnQueue::new();

        let mut low = zone_req(1);
        low.priority = SpawnPriority::Low;
        let mut critical = zone_req(2);
        critical.priority = SpawnPriority::Critical;
        let mut normal = zone_req(3);
        normal.priority = SpawnPriority::Normal;

        assert!(queue.enqueue(low, 10));
        assert!(queue.enqueue(critical, 20));
        assert!(queue.enqueue(normal, 30));

        assert_eq!(queue.dequeue(40).unwrap().priority, SpawnPriority::Critical);
        assert_eq!(queue.dequeue(40).unwrap().priority, SpawnPriority::Normal);
        assert_eq!(queue.dequeue(40).unwrap().priority, SpawnPriority::Low);
        assert!(queue.dequeue(40).is_none());
    }

    #[test]
    fn test_fifo_within_priority() {
        let queue = SpawnQueue::new();

        queue.enqueue(zone_req(10), 100);
        queue.enqueue(zone_req(20), 200);
        queue.enqueue(zone_req(30), 300);

        assert_eq!(queue.dequeue(400).unwrap().request.zone, Some(10));
        assert_eq!(queue.dequeue(400).unwrap().request.zone, Some(20));
        assert_eq!(queue.dequeue(400).unwrap().request.zone, Some(30));
    }

    #[test]
    fn test_duplicate_named_request_rejected() {
        let queue = SpawnQueue::new();

        assert!(queue.enqueue(named_req(7), 1));
        assert!(!queue.enqueue(named_req(7), 2));
        assert_eq!(queue.len(), 1);

        // Once dequeued the guid may be enqueued again.
        queue.dequeue(3);
        assert!(queue.enqueue(named_req(7), 4));
    }

    #[test]
    fn test_anonymous_requests_always_accepted() {
        let queue = SpawnQueue::new();
        for _ in 0..10 {
            assert!(queue.enqueue(zone_req(12), 1));
        }
        assert_eq!(queue.len(), 10);
    }

    #[test]
    fn test_contains_and_remove() {
        let queue = SpawnQueue::new();
        let guid = CharacterGuid::player(42);

        queue.enqueue(named_req(42), 1);
        queue.enqueue(named_req(43), 1);
        assert!(queue.contains(guid));

        assert!(queue.remove(guid));
        assert!(!queue.contains(guid));
        assert_eq!(queue.len(), 1);
        assert!(!queue.remove(guid));

        // Remaining entry survives the rebuild.
        assert_eq!(
            queue.dequeue(2).unwrap().request.character,
            Some(CharacterGuid::player(43))
        );
    }

    #[test]
    fn test_enqueue_sets_time_only_when_zero() {
        let queue = SpawnQueue::new();

        let mut preset = zone_req(1);
        preset.enqueue_time_ms = 5;
        queue.enqueue(preset, 100);
        assert_eq!(queue.dequeue(100).unwrap().enqueue_time_ms, 5);

        queue.enqueue(zone_req(1), 100);
        assert_eq!(queue.dequeue(100).unwrap().enqueue_time_ms, 100);
    }

    #[test]
    fn test_metrics() {
        let queue = SpawnQueue::new();

        let mut high = zone_req(1);
        high.priority = SpawnPriority::High;
        queue.enqueue(high, 0);
        queue.enqueue(zone_req(2), 0);

        let metrics = queue.metrics();
        assert_eq!(metrics.depth, 2);
        assert_eq!(metrics.depth_by_priority[SpawnPriority::High as usize], 1);
        assert_eq!(metrics.depth_by_priority[SpawnPriority::Normal as usize], 1);

        queue.dequeue(50);
        let metrics = queue.metrics();
        assert_eq!(metrics.dequeued_total, 1);
        assert_eq!(metrics.avg_wait_ms, 50);
    }

    #[test]
    fn test_pending_for_zone_counts_anonymous_only() {
        let queue = SpawnQueue::new();
        queue.enqueue(zone_req(12), 1);
        queue.enqueue(zone_req(12), 1);
        queue.enqueue(zone_req(13), 1);

        // A named request bound for the same zone does not count.
        let mut named = named_req(5);
        named.request.zone = Some(12);
        queue.enqueue(named, 1);

        assert_eq!(queue.pending_for_zone(12), 2);
        assert_eq!(queue.pending_for_zone(13), 1);
        assert_eq!(queue.pending_for_zone(14), 0);
    }

    #[test]
    fn test_len_by_priority() {
        let queue = SpawnQueue::new();
        queue.enqueue(named_req(1), 1); // High
        queue.enqueue(zone_req(2), 1); // Normal
        queue.enqueue(zone_req(3), 1); // Normal

        assert_eq!(queue.len_by_priority(SpawnPriority::High), 1);
        assert_eq!(queue.len_by_priority(SpawnPriority::Normal), 2);
        assert_eq!(queue.len_by_priority(SpawnPriority::Low), 0);
    }
}
