//! Event batching: a thread-safe append-buffer snapshotted into fixed-size batches, feeding a
//! bounded retry deque. When the deque overflows, the oldest batch is evicted and its event
//! count accumulates into a dropped-events counter drained periodically as a diagnostics
//! exception.
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::events::event::StatsigEventInternal;

pub const DEFAULT_EVENT_QUEUE_SIZE: usize = 500;
pub const DEFAULT_RETRY_QUEUE_SIZE: usize = 10;

/// One snapshot of the buffer, ready to POST.
#[derive(Debug)]
pub struct BatchedEvents {
    pub events: Vec<StatsigEventInternal>,
    pub event_count: u64,
    pub retries: u32,
}

pub struct EventBatcher {
    buffer: Mutex<Vec<StatsigEventInternal>>,
    queue: Mutex<VecDeque<BatchedEvents>>,
    batch_size: usize,
    max_queue_size: usize,
    dropped_events: AtomicU64,
}

impl EventBatcher {
    pub fn new(batch_size: usize, max_queue_size: usize) -> EventBatcher {
        EventBatcher {
            buffer: Mutex::new(Vec::new()),
            queue: Mutex::new(VecDeque::new()),
            batch_size: batch_size.max(1),
            max_queue_size: max_queue_size.max(1),
            dropped_events: AtomicU64::new(0),
        }
    }

    /// Append one event. Crossing the batch-size threshold snapshots the buffer into a batch.
    pub fn enqueue(&self, event: StatsigEventInternal) {
        let batch = {
            let mut buffer = self
                .buffer
                .lock()
                .expect("thread holding event buffer lock should not panic");
            buffer.push(event);
            if buffer.len() >= self.batch_size {
                Some(std::mem::take(&mut *buffer))
            } else {
                None
            }
        };
        if let Some(events) = batch {
            self.push_batch(events, 0);
        }
    }

    /// Snapshot whatever is buffered into a batch. Driven by the periodic tick and by flush.
    pub fn cut_batch(&self) {
        let events = {
            let mut buffer = self
                .buffer
                .lock()
                .expect("thread holding event buffer lock should not panic");
            if buffer.is_empty() {
                return;
            }
            std::mem::take(&mut *buffer)
        };
        self.push_batch(events, 0);
    }

    fn push_batch(&self, events: Vec<StatsigEventInternal>, retries: u32) {
        let batch = BatchedEvents {
            event_count: events.len() as u64,
            events,
            retries,
        };
        let mut queue = self
            .queue
            .lock()
            .expect("thread holding retry queue lock should not panic");
        if queue.len() >= self.max_queue_size {
            if let Some(evicted) = queue.pop_front() {
                log::warn!(
                    target: "statsig",
                    "retry queue full; dropping oldest batch of {} events",
                    evicted.event_count
                );
                self.dropped_events
                    .fetch_add(evicted.event_count, Ordering::Relaxed);
            }
        }
        queue.push_back(batch);
    }

    /// Take the oldest pending batch, if any.
    pub fn pop_batch(&self) -> Option<BatchedEvents> {
        self.queue
            .lock()
            .expect("thread holding retry queue lock should not panic")
            .pop_front()
    }

    /// Put a failed batch back with its retry count bumped, subject to the same bound.
    pub fn requeue(&self, mut batch: BatchedEvents) {
        batch.retries += 1;
        let mut queue = self
            .queue
            .lock()
            .expect("thread holding retry queue lock should not panic");
        if queue.len() >= self.max_queue_size {
            if let Some(evicted) = queue.pop_front() {
                self.dropped_events
                    .fetch_add(evicted.event_count, Ordering::Relaxed);
            }
        }
        queue.push_back(batch);
    }

    /// Record events dropped outside the queue path (e.g. a batch exhausting its retries).
    pub fn record_dropped(&self, count: u64) {
        self.dropped_events.fetch_add(count, Ordering::Relaxed);
    }

    /// Drain the dropped-events counter, returning the count accumulated since the last drain.
    pub fn take_dropped_count(&self) -> u64 {
        self.dropped_events.swap(0, Ordering::Relaxed)
    }

    pub fn pending_batches(&self) -> usize {
        self.queue
            .lock()
            .expect("thread holding retry queue lock should not panic")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        let buffered = self
            .buffer
            .lock()
            .expect("thread holding event buffer lock should not panic")
            .is_empty();
        buffered && self.pending_batches() == 0
    }

    /// Snapshot the buffer and drain every queued batch. Used by shutdown.
    pub fn drain_all(&self) -> Vec<BatchedEvents> {
        self.cut_batch();
        let mut queue = self
            .queue
            .lock()
            .expect("thread holding retry queue lock should not panic");
        queue.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::user::StatsigUser;

    fn event(n: usize) -> StatsigEventInternal {
        StatsigEventInternal::custom(
            &StatsigUser::with_user_id("u"),
            &format!("event_{n}"),
            None,
            None,
        )
    }

    #[test]
    fn burst_cuts_exactly_one_batch_at_threshold() {
        let batcher = EventBatcher::new(500, 10);
        for n in 0..500 {
            batcher.enqueue(event(n));
        }
        assert_eq!(batcher.pending_batches(), 1);
        let batch = batcher.pop_batch().unwrap();
        assert_eq!(batch.event_count, 500);
        assert_eq!(batch.retries, 0);

        // A 501st enqueue stays buffered until the next tick or threshold.
        batcher.enqueue(event(500));
        assert_eq!(batcher.pending_batches(), 0);
        assert!(!batcher.is_empty());
        batcher.cut_batch();
        assert_eq!(batcher.pop_batch().unwrap().event_count, 1);
    }

    #[test]
    fn tick_with_empty_buffer_is_a_no_op() {
        let batcher = EventBatcher::new(500, 10);
        batcher.cut_batch();
        assert_eq!(batcher.pending_batches(), 0);
        assert!(batcher.is_empty());
    }

    #[test]
    fn overflow_evicts_oldest_and_counts_dropped() {
        let batcher = EventBatcher::new(2, 2);
        for n in 0..4 {
            batcher.enqueue(event(n));
        }
        assert_eq!(batcher.pending_batches(), 2);

        // Third batch of 2 events evicts the first.
        batcher.enqueue(event(4));
        batcher.enqueue(event(5));
        assert_eq!(batcher.pending_batches(), 2);
        assert_eq!(batcher.take_dropped_count(), 2);
        assert_eq!(batcher.take_dropped_count(), 0);

        let batch = batcher.pop_batch().unwrap();
        assert_eq!(batch.events[0].event_name, "event_2");
    }

    #[test]
    fn requeue_bumps_retries() {
        let batcher = EventBatcher::new(1, 10);
        batcher.enqueue(event(0));
        let batch = batcher.pop_batch().unwrap();
        batcher.requeue(batch);
        assert_eq!(batcher.pop_batch().unwrap().retries, 1);
    }

    #[test]
    fn drain_all_includes_buffered_events() {
        let batcher = EventBatcher::new(100, 10);
        batcher.enqueue(event(0));
        batcher.enqueue(event(1));
        let drained = batcher.drain_all();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].event_count, 2);
        assert!(batcher.is_empty());
    }
}
