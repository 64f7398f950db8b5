//! Pending-start queues.
//!
//! A device which can accept a Start while it is already running a
//! channel program declares a queue capacity.  Each queued Start is
//! remembered by the address of its descriptor list; the engine takes
//! the oldest one when the running program finishes.
use base::collections::ring::BoundedQueue;
use base::prelude::*;

use super::error::QueueOverflow;

#[derive(Debug)]
pub(crate) struct PendingStartQueue {
    unit: UnitAddress,
    lists: BoundedQueue<Address>,
}

impl PendingStartQueue {
    pub(crate) fn new(unit: UnitAddress, capacity: usize) -> PendingStartQueue {
        PendingStartQueue {
            unit,
            lists: BoundedQueue::with_capacity(capacity),
        }
    }

    pub(crate) fn enqueue(&mut self, list_address: Address) -> Result<(), QueueOverflow> {
        self.lists
            .push_back(list_address)
            .map_err(|_| QueueOverflow::PendingStart(self.unit))
    }

    pub(crate) fn dequeue(&mut self) -> Option<Address> {
        self.lists.pop_front()
    }

    pub(crate) fn clear(&mut self) {
        self.lists.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.lists.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }
}

#[test]
fn test_pending_queue_is_fifo_and_bounded() {
    let unit = UnitAddress::new(0x20, 0x01);
    let mut q = PendingStartQueue::new(unit, 2);
    let a = Address::from_low_bits(0x100);
    let b = Address::from_low_bits(0x200);
    assert_eq!(q.enqueue(a), Ok(()));
    assert_eq!(q.enqueue(b), Ok(()));
    assert_eq!(
        q.enqueue(Address::from_low_bits(0x300)),
        Err(QueueOverflow::PendingStart(unit))
    );
    assert_eq!(q.dequeue(), Some(a));
    assert_eq!(q.dequeue(), Some(b));
    assert_eq!(q.dequeue(), None);
    assert!(q.is_empty());
}
