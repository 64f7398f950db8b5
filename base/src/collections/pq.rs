//! A keyed queue of deadlines.
//!
//! Each key has at most one deadline.  Earlier deadlines come out
//! first; deadlines which are equal come out in the order they were
//! scheduled, so that a simulation using the queue is deterministic.
use std::cmp::Ordering;
use std::fmt::{self, Debug, Formatter};
use std::hash::Hash;

use keyed_priority_queue::KeyedPriorityQueue;

#[cfg(test)]
use test_strategy::proptest;

/// `KeyedPriorityQueue` pops the largest priority first, so we
/// reverse the ordering of (deadline, sequence) pairs.
#[derive(Debug)]
struct Due<T> {
    deadline: T,
    seq: u64,
}

impl<T: Ord> PartialOrd for Due<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: Eq> Eq for Due<T> {}

impl<T: Eq> PartialEq for Due<T> {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl<T: Ord> Ord for Due<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        (&other.deadline, other.seq).cmp(&(&self.deadline, self.seq))
    }
}

#[test]
fn test_due_order() {
    let early = Due {
        deadline: 1,
        seq: 7,
    };
    let late = Due {
        deadline: 2,
        seq: 0,
    };
    assert!(early > late);
    let first = Due {
        deadline: 2,
        seq: 1,
    };
    assert!(first < early);
    assert!(first > Due {
        deadline: 2,
        seq: 2
    });
}

pub struct KeyedDeadlineQueue<K: Hash + Eq, T: Ord> {
    items: KeyedPriorityQueue<K, Due<T>>,
    next_seq: u64,
}

impl<K, T> KeyedDeadlineQueue<K, T>
where
    K: Hash + Eq,
    T: Ord,
{
    #[must_use]
    pub fn new() -> KeyedDeadlineQueue<K, T> {
        KeyedDeadlineQueue {
            items: KeyedPriorityQueue::new(),
            next_seq: 0,
        }
    }

    /// Schedule `key` at `deadline`, replacing any deadline it already
    /// had.  The previous deadline (if any) is returned.
    pub fn schedule(&mut self, key: K, deadline: T) -> Option<T> {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        self.items
            .push(key, Due { deadline, seq })
            .map(|due| due.deadline)
    }

    /// Remove the deadline for `key`, returning it if there was one.
    pub fn cancel(&mut self, key: &K) -> Option<T> {
        self.items.remove(key).map(|due| due.deadline)
    }

    pub fn is_scheduled(&self, key: &K) -> bool {
        self.items.get_priority(key).is_some()
    }

    pub fn deadline_of(&self, key: &K) -> Option<&T> {
        self.items.get_priority(key).map(|due| &due.deadline)
    }

    /// The earliest deadline, with its key.
    pub fn peek(&self) -> Option<(&K, &T)> {
        self.items.peek().map(|(k, due)| (k, &due.deadline))
    }

    pub fn next_deadline(&self) -> Option<&T> {
        self.peek().map(|(_, deadline)| deadline)
    }

    /// Remove and return the earliest entry whose deadline is no
    /// later than `now`.
    pub fn pop_due(&mut self, now: &T) -> Option<(K, T)> {
        match self.items.peek() {
            Some((_, due)) if due.deadline <= *now => {
                self.items.pop().map(|(k, due)| (k, due.deadline))
            }
            _ => None,
        }
    }

    pub fn pop(&mut self) -> Option<(K, T)> {
        self.items.pop().map(|(k, due)| (k, due.deadline))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        while self.items.pop().is_some() {}
    }
}

impl<K, T> Default for KeyedDeadlineQueue<K, T>
where
    K: Hash + Eq,
    T: Ord,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, T> Debug for KeyedDeadlineQueue<K, T>
where
    K: Hash + Eq + Debug,
    T: Ord + Debug,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedDeadlineQueue")
            .field("items", &self.items)
            .field("next_seq", &self.next_seq)
            .finish()
    }
}

#[test]
fn test_empty() {
    let mut q: KeyedDeadlineQueue<usize, u32> = KeyedDeadlineQueue::default();
    assert!(q.is_empty());
    assert_eq!(0, q.len());
    assert_eq!(q.peek(), None);
    assert_eq!(q.pop_due(&u32::MAX), None);
    assert_eq!(q.pop(), None);
}

#[test]
fn test_reschedule_replaces() {
    let mut q: KeyedDeadlineQueue<char, u32> = KeyedDeadlineQueue::new();
    assert_eq!(q.schedule('a', 20), None);
    assert_eq!(q.schedule('a', 40), Some(20));
    assert_eq!(q.len(), 1);
    assert_eq!(q.deadline_of(&'a'), Some(&40));
    assert_eq!(q.pop_due(&39), None);
    assert_eq!(q.pop_due(&40), Some(('a', 40)));
    assert!(q.is_empty());
}

#[test]
fn test_cancel() {
    let mut q: KeyedDeadlineQueue<char, u32> = KeyedDeadlineQueue::new();
    q.schedule('a', 5);
    q.schedule('b', 3);
    assert_eq!(q.cancel(&'b'), Some(3));
    assert_eq!(q.cancel(&'b'), None);
    assert!(!q.is_scheduled(&'b'));
    assert!(q.is_scheduled(&'a'));
    assert_eq!(q.next_deadline(), Some(&5));
}

#[test]
fn test_ties_pop_in_schedule_order() {
    let mut q: KeyedDeadlineQueue<char, u32> = KeyedDeadlineQueue::new();
    q.schedule('z', 10);
    q.schedule('m', 10);
    q.schedule('a', 10);
    q.schedule('q', 2);
    assert_eq!(q.pop_due(&10), Some(('q', 2)));
    assert_eq!(q.pop_due(&10), Some(('z', 10)));
    assert_eq!(q.pop_due(&10), Some(('m', 10)));
    assert_eq!(q.pop_due(&10), Some(('a', 10)));
    assert_eq!(q.pop_due(&10), None);
}

#[cfg(test)]
#[proptest]
fn deadlines_come_out_in_order(deadlines: Vec<u16>) {
    let mut q: KeyedDeadlineQueue<usize, u16> = KeyedDeadlineQueue::new();
    for (key, deadline) in deadlines.iter().enumerate() {
        q.schedule(key, *deadline);
    }
    let mut previous: Option<(u16, usize)> = None;
    while let Some((key, deadline)) = q.pop() {
        if let Some(prev) = previous {
            assert!(prev < (deadline, key));
        }
        previous = Some((deadline, key));
    }
}
