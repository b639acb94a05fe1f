//! Backlog of admitted triggers
//!
//! Drains by priority band (critical > high > medium > low) and FIFO by
//! admission order within a band.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use uuid::Uuid;

use crate::search::SearchTrigger;

#[derive(Debug)]
struct Queued {
    rank: u8,
    seq: u64,
    trigger: SearchTrigger,
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.rank == other.rank && self.seq == other.seq
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    // Max-heap: higher rank first, then lower sequence number first
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank
            .cmp(&other.rank)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Priority backlog of triggers awaiting dispatch
#[derive(Debug, Default)]
pub struct TriggerQueue {
    heap: BinaryHeap<Queued>,
    next_seq: u64,
}

impl TriggerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, trigger: SearchTrigger) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Queued {
            rank: trigger.priority.rank(),
            seq,
            trigger,
        });
    }

    /// Next trigger to dispatch
    pub fn pop(&mut self) -> Option<SearchTrigger> {
        self.heap.pop().map(|q| q.trigger)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn contains(&self, trigger_id: &Uuid) -> bool {
        self.heap.iter().any(|q| &q.trigger.id == trigger_id)
    }

    /// Triggers in the order they would be dispatched
    pub fn snapshot(&self) -> Vec<SearchTrigger> {
        let mut items: Vec<&Queued> = self.heap.iter().collect();
        items.sort_by(|a, b| b.cmp(a));
        items.into_iter().map(|q| q.trigger.clone()).collect()
    }

    /// Remove everything, returning the drained triggers
    pub fn drain(&mut self) -> Vec<SearchTrigger> {
        let items = self.snapshot();
        self.heap.clear();
        items
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::{Priority, SearchRequest};

    fn trigger(query: &str, priority: Priority) -> SearchTrigger {
        SearchTrigger::admit(SearchRequest::new(query, "test").with_priority(priority))
    }

    #[test]
    fn test_fifo_within_same_priority() {
        let mut queue = TriggerQueue::new();
        for q in ["a", "b", "c"] {
            queue.push(trigger(q, Priority::Medium));
        }
        let order: Vec<String> = std::iter::from_fn(|| queue.pop()).map(|t| t.query).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_higher_priority_drains_first() {
        let mut queue = TriggerQueue::new();
        queue.push(trigger("low", Priority::Low));
        queue.push(trigger("medium-1", Priority::Medium));
        queue.push(trigger("critical", Priority::Critical));
        queue.push(trigger("medium-2", Priority::Medium));
        queue.push(trigger("high", Priority::High));

        let snapshot: Vec<String> = queue.snapshot().into_iter().map(|t| t.query).collect();
        assert_eq!(
            snapshot,
            vec!["critical", "high", "medium-1", "medium-2", "low"]
        );

        let order: Vec<String> = std::iter::from_fn(|| queue.pop()).map(|t| t.query).collect();
        assert_eq!(order, snapshot);
    }

    #[test]
    fn test_drain_empties_queue() {
        let mut queue = TriggerQueue::new();
        queue.push(trigger("a", Priority::Low));
        queue.push(trigger("b", Priority::High));

        let drained = queue.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].query, "b");
        assert!(queue.is_empty());
        assert_eq!(queue.len(), 0);
        assert!(!queue.contains(&drained[0].id));
    }
}
