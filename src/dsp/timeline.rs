//! Continuations scheduled against the audio clock.
//!
//! Things that must happen "when the oscillator ends" or "once the fade
//! is over" are queued here with the clock time they are due, and fired
//! by the engine as the clock passes them. Entries due at the same time
//! fire in the order they were scheduled.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

#[derive(Debug)]
struct Entry<T> {
    at: f64,
    seq: u64,
    item: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Entry<T> {
    // Reversed: BinaryHeap is a max-heap and we want the earliest first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .at
            .total_cmp(&self.at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Debug)]
pub struct Timeline<T> {
    heap: BinaryHeap<Entry<T>>,
    seq: u64,
}

impl<T> Timeline<T> {
    pub fn new() -> Self {
        Timeline {
            heap: BinaryHeap::new(),
            seq: 0,
        }
    }

    pub fn schedule(&mut self, at: f64, item: T) {
        self.seq += 1;
        self.heap.push(Entry {
            at,
            seq: self.seq,
            item,
        });
    }

    /// When the earliest pending entry is due.
    pub fn next_time(&self) -> Option<f64> {
        self.heap.peek().map(|e| e.at)
    }

    /// Remove and return the earliest entry if it is due at or before `now`.
    pub fn pop_due(&mut self, now: f64) -> Option<T> {
        if self.heap.peek()?.at <= now {
            self.heap.pop().map(|e| e.item)
        } else {
            None
        }
    }

    /// Keep only the entries whose item satisfies `keep`.
    pub fn retain<F>(&mut self, mut keep: F)
    where
        F: FnMut(&T) -> bool,
    {
        self.heap.retain(|e| keep(&e.item));
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

impl<T> Default for Timeline<T> {
    fn default() -> Self {
        Timeline::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_in_time_order() {
        let mut timeline = Timeline::new();
        timeline.schedule(0.5, "late");
        timeline.schedule(0.1, "early");
        timeline.schedule(0.3, "middle");

        assert_eq!(timeline.next_time(), Some(0.1));
        assert_eq!(timeline.pop_due(0.2), Some("early"));
        assert_eq!(timeline.pop_due(0.2), None);
        assert_eq!(timeline.pop_due(1.0), Some("middle"));
        assert_eq!(timeline.pop_due(1.0), Some("late"));
        assert!(timeline.is_empty());
    }

    #[test]
    fn ties_keep_scheduling_order() {
        let mut timeline = Timeline::new();
        for i in 0..5 {
            timeline.schedule(1.0, i);
        }
        let fired: Vec<i32> = std::iter::from_fn(|| timeline.pop_due(1.0)).collect();
        assert_eq!(fired, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn retain_drops_entries() {
        let mut timeline = Timeline::new();
        for i in 0..6 {
            timeline.schedule(i as f64, i);
        }
        timeline.retain(|&i| i % 2 == 0);
        assert_eq!(timeline.len(), 3);
        let fired: Vec<i32> = std::iter::from_fn(|| timeline.pop_due(10.0)).collect();
        assert_eq!(fired, vec![0, 2, 4]);
    }

    #[test]
    fn nothing_due_on_empty() {
        let mut timeline: Timeline<()> = Timeline::default();
        assert_eq!(timeline.next_time(), None);
        assert_eq!(timeline.pop_due(100.0), None);
        assert_eq!(timeline.len(), 0);
    }
}
