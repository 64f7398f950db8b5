//! A FIFO queue with a fixed capacity.
//!
//! Pushing into a full queue fails and hands the rejected item back
//! to the caller; nothing already queued is ever displaced.
use std::collections::VecDeque;
use std::error::Error;
use std::fmt::{self, Debug, Display, Formatter};

#[cfg(test)]
use test_strategy::proptest;

/// The item which could not be queued because the queue was full.
#[derive(Debug, PartialEq, Eq)]
pub struct QueueFull<T>(pub T);

impl<T> Display for QueueFull<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        f.write_str("queue is full")
    }
}

impl<T: Debug> Error for QueueFull<T> {}

#[derive(Debug, Clone)]
pub struct BoundedQueue<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> BoundedQueue<T> {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> BoundedQueue<T> {
        BoundedQueue {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append `item` at the back of the queue.
    ///
    /// # Errors
    ///
    /// `QueueFull(item)` when the queue is already at capacity.
    pub fn push_back(&mut self, item: T) -> Result<(), QueueFull<T>> {
        if self.is_full() {
            Err(QueueFull(item))
        } else {
            self.items.push_back(item);
            Ok(())
        }
    }

    /// Put `item` back at the head of the queue, so that it is the
    /// next to be popped.
    ///
    /// # Errors
    ///
    /// `QueueFull(item)` when the queue is already at capacity.
    pub fn push_front(&mut self, item: T) -> Result<(), QueueFull<T>> {
        if self.is_full() {
            Err(QueueFull(item))
        } else {
            self.items.push_front(item);
            Ok(())
        }
    }

    pub fn pop_front(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    pub fn peek(&self) -> Option<&T> {
        self.items.front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Keep only the items for which `keep` returns true, preserving
    /// their order.
    pub fn retain<F>(&mut self, keep: F)
    where
        F: FnMut(&T) -> bool,
    {
        self.items.retain(keep);
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }
}

#[test]
fn test_zero_capacity_is_always_full() {
    let mut q: BoundedQueue<u8> = BoundedQueue::with_capacity(0);
    assert!(q.is_full());
    assert!(q.is_empty());
    assert_eq!(q.push_back(1), Err(QueueFull(1)));
}

#[test]
fn test_full_queue_rejects_without_displacing() {
    let mut q = BoundedQueue::with_capacity(2);
    assert_eq!(q.push_back('a'), Ok(()));
    assert_eq!(q.push_back('b'), Ok(()));
    assert!(q.is_full());
    assert_eq!(q.push_back('c'), Err(QueueFull('c')));
    assert_eq!(q.push_front('c'), Err(QueueFull('c')));
    assert_eq!(q.pop_front(), Some('a'));
    assert_eq!(q.push_front('z'), Ok(()));
    assert_eq!(q.iter().copied().collect::<Vec<_>>(), vec!['z', 'b']);
}

#[test]
fn test_retain() {
    let mut q = BoundedQueue::with_capacity(5);
    for n in 0..5 {
        assert!(q.push_back(n).is_ok());
    }
    q.retain(|n| n % 2 == 0);
    assert_eq!(q.len(), 3);
    assert_eq!(q.peek(), Some(&0));
    q.clear();
    assert!(q.is_empty());
    assert_eq!(q.capacity(), 5);
}

#[cfg(test)]
#[proptest]
fn items_come_out_in_arrival_order(#[strategy(1..16_usize)] capacity: usize, items: Vec<u8>) {
    let mut q = BoundedQueue::with_capacity(capacity);
    let mut accepted = Vec::new();
    for item in items {
        if q.push_back(item).is_ok() {
            accepted.push(item);
        }
    }
    assert_eq!(accepted.len(), q.len());
    assert!(q.len() <= capacity);
    let mut popped = Vec::new();
    while let Some(item) = q.pop_front() {
        popped.push(item);
    }
    assert_eq!(popped, accepted);
}
