//! `queue` crate — in-memory priority queue for undispatched work.
//!
//! [`PriorityTaskQueue`] always hands back the highest-priority item first.
//! Items of equal priority come back in the order they were enqueued.
//!
//! The queue is unbounded and has no internal locking: callers that share it
//! between producers and consumers must wrap it themselves, and are
//! responsible for bounding its growth.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use tracing::trace;

/// A queued item with its priority and insertion sequence.
#[derive(Debug)]
struct QueueEntry<T> {
    priority: i64,
    seq: u64,
    item: T,
}

impl<T> PartialEq for QueueEntry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl<T> Eq for QueueEntry<T> {}

impl<T> PartialOrd for QueueEntry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for QueueEntry<T> {
    // Max-heap on priority; among equals the lower sequence (older) wins.
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Max-priority queue with FIFO ordering among equal priorities.
#[derive(Debug)]
pub struct PriorityTaskQueue<T> {
    heap: BinaryHeap<QueueEntry<T>>,
    next_seq: u64,
}

impl<T> Default for PriorityTaskQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PriorityTaskQueue<T> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    /// Insert `item` with the given priority. Higher values are dequeued first.
    pub fn enqueue(&mut self, item: T, priority: i64) {
        let seq = self.next_seq;
        self.next_seq += 1;
        trace!(priority, seq, "enqueue");
        self.heap.push(QueueEntry { priority, seq, item });
    }

    /// Remove and return the highest-priority item, or `None` if the queue is
    /// empty.
    pub fn dequeue(&mut self) -> Option<T> {
        self.heap.pop().map(|entry| {
            trace!(priority = entry.priority, seq = entry.seq, "dequeue");
            entry.item
        })
    }

    /// The item `dequeue` would return next, without removing it.
    pub fn peek(&self) -> Option<&T> {
        self.heap.peek().map(|entry| &entry.item)
    }

    /// Priority of the item `dequeue` would return next.
    pub fn peek_priority(&self) -> Option<i64> {
        self.heap.peek().map(|entry| entry.priority)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Drop every queued item.
    pub fn clear(&mut self) {
        self.heap.clear();
    }
}

impl<T> Extend<(T, i64)> for PriorityTaskQueue<T> {
    fn extend<I: IntoIterator<Item = (T, i64)>>(&mut self, iter: I) {
        for (item, priority) in iter {
            self.enqueue(item, priority);
        }
    }
}

impl<T> FromIterator<(T, i64)> for PriorityTaskQueue<T> {
    fn from_iter<I: IntoIterator<Item = (T, i64)>>(iter: I) -> Self {
        let mut queue = Self::new();
        queue.extend(iter);
        queue
    }
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dequeues_in_non_increasing_priority() {
        let mut queue = PriorityTaskQueue::new();
        for (i, p) in [3, 1, 4, 1, 5].into_iter().enumerate() {
            queue.enqueue(i, p);
        }

        let mut priorities = Vec::new();
        while let Some(p) = queue.peek_priority() {
            priorities.push(p);
            queue.dequeue();
        }

        assert_eq!(priorities, vec![5, 4, 3, 1, 1]);
        assert!(priorities.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn equal_priorities_come_back_in_insertion_order() {
        let queue: PriorityTaskQueue<&str> =
            [("first", 1), ("high", 9), ("second", 1), ("third", 1)].into_iter().collect();

        let order: Vec<&str> = std::iter::from_fn({
            let mut queue = queue;
            move || queue.dequeue()
        })
        .collect();

        assert_eq!(order, vec!["high", "first", "second", "third"]);
    }

    #[test]
    fn is_empty_tracks_len() {
        let mut queue = PriorityTaskQueue::new();
        assert!(queue.is_empty());
        assert_eq!(queue.len(), 0);

        queue.enqueue("a", 0);
        queue.enqueue("b", -3);
        assert!(!queue.is_empty());
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.dequeue(), Some("a"));
        assert_eq!(queue.dequeue(), Some("b"));
        assert_eq!(queue.dequeue(), None);
        assert!(queue.is_empty());
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn peek_does_not_remove() {
        let mut queue = PriorityTaskQueue::new();
        assert_eq!(queue.peek(), None);

        queue.enqueue("low", 1);
        queue.enqueue("top", 2);
        assert_eq!(queue.peek(), Some(&"top"));
        assert_eq!(queue.len(), 2);

        queue.clear();
        assert!(queue.is_empty());
    }
}
