use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

/// A command waiting for its deadline (nanoseconds on the session timer).
#[derive(Debug, Clone)]
pub struct Scheduled<C> {
    pub deadline_ns: u64,
    seq: u64,
    pub command: C,
}

impl<C> PartialEq for Scheduled<C> {
    fn eq(&self, other: &Self) -> bool {
        self.deadline_ns == other.deadline_ns && self.seq == other.seq
    }
}

impl<C> Eq for Scheduled<C> {}

impl<C> PartialOrd for Scheduled<C> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<C> Ord for Scheduled<C> {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.deadline_ns, self.seq).cmp(&(other.deadline_ns, other.seq))
    }
}

/// Deadline-ordered queue of deferred commands.
///
/// Commands with equal deadlines fire in the order they were scheduled.
/// There is no cancellation: the receiver validates each command when it
/// fires and drops the ones that no longer apply.
#[derive(Debug)]
pub struct TimerQueue<C> {
    heap: BinaryHeap<Reverse<Scheduled<C>>>,
    next_seq: u64,
}

impl<C> Default for TimerQueue<C> {
    fn default() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_seq: 0,
        }
    }
}

impl<C> TimerQueue<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, deadline_ns: u64, command: C) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(Scheduled {
            deadline_ns,
            seq,
            command,
        }));
    }

    /// Removes and returns the earliest command whose deadline has passed.
    pub fn pop_due(&mut self, now_ns: u64) -> Option<C> {
        match self.heap.peek() {
            Some(Reverse(s)) if s.deadline_ns <= now_ns => {
                self.heap.pop().map(|Reverse(s)| s.command)
            }
            _ => None,
        }
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.heap.peek().map(|Reverse(s)| s.deadline_ns)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_in_deadline_then_schedule_order() {
        let mut q = TimerQueue::new();
        q.schedule(30, "c");
        q.schedule(10, "a");
        q.schedule(10, "b");

        assert_eq!(q.next_deadline(), Some(10));
        assert_eq!(q.pop_due(5), None);
        assert_eq!(q.pop_due(10), Some("a"));
        assert_eq!(q.pop_due(10), Some("b"));
        assert_eq!(q.pop_due(29), None);
        assert_eq!(q.pop_due(100), Some("c"));
        assert!(q.is_empty());
    }

    #[test]
    fn clear_drops_everything() {
        let mut q = TimerQueue::new();
        q.schedule(1, 1u8);
        q.schedule(2, 2u8);
        assert_eq!(q.len(), 2);
        q.clear();
        assert_eq!(q.pop_due(u64::MAX), None);
    }
}
