//! The per-channel status FIFO.
//!
//! Completed channel programs leave their status records here until
//! the program collects them (via an interrupt or an XIO instruction).
//! The FIFO never overwrites: storing into a full FIFO fails.
use base::collections::ring::BoundedQueue;
use base::prelude::*;

use super::error::QueueOverflow;

#[derive(Debug)]
pub(crate) struct StatusFifo {
    channel: ChannelNumber,
    records: BoundedQueue<StatusRecord>,
}

impl StatusFifo {
    pub(crate) fn new(channel: ChannelNumber, capacity: usize) -> StatusFifo {
        StatusFifo {
            channel,
            records: BoundedQueue::with_capacity(capacity),
        }
    }

    pub(crate) fn store(&mut self, record: StatusRecord) -> Result<(), QueueOverflow> {
        self.records
            .push_back(record)
            .map_err(|_| QueueOverflow::StatusFifo(self.channel))
    }

    /// Return a record to the head of the FIFO, so that it is the next
    /// one to be posted.
    pub(crate) fn push_front(&mut self, record: StatusRecord) -> Result<(), QueueOverflow> {
        self.records
            .push_front(record)
            .map_err(|_| QueueOverflow::StatusFifo(self.channel))
    }

    pub(crate) fn pop(&mut self) -> Option<StatusRecord> {
        self.records.pop_front()
    }

    #[cfg(test)]
    pub(crate) fn peek(&self) -> Option<&StatusRecord> {
        self.records.peek()
    }

    pub(crate) fn clear(&mut self) {
        self.records.clear();
    }

    /// Discard the records of one unit.
    pub(crate) fn purge_unit(&mut self, sub: SubAddress) {
        self.records.retain(|r| r.sub != sub);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }

    #[cfg(test)]
    pub(crate) fn capacity(&self) -> usize {
        self.records.capacity()
    }
}

#[cfg(test)]
fn record(sub: u8, residual: u16) -> StatusRecord {
    StatusRecord {
        sub: SubAddress(sub),
        ending_address: Address::ZERO,
        flags: StatusFlags::ENDS,
        residual,
    }
}

#[test]
fn test_fifo_overflow_keeps_earlier_records() {
    let mut fifo = StatusFifo::new(ChannelNumber(0x20), 3);
    for n in 0..3 {
        assert_eq!(fifo.store(record(1, n)), Ok(()));
    }
    assert_eq!(
        fifo.store(record(1, 99)),
        Err(QueueOverflow::StatusFifo(ChannelNumber(0x20)))
    );
    assert_eq!(fifo.len(), 3);
    for n in 0..3 {
        assert_eq!(fifo.pop(), Some(record(1, n)));
    }
    assert!(fifo.is_empty());
}

#[test]
fn test_fifo_push_front() {
    let mut fifo = StatusFifo::new(ChannelNumber(0), 2);
    assert!(fifo.store(record(1, 1)).is_ok());
    assert!(fifo.push_front(record(2, 2)).is_ok());
    assert_eq!(fifo.peek(), Some(&record(2, 2)));
    assert!(fifo.push_front(record(3, 3)).is_err());
}

#[test]
fn test_fifo_purge_unit() {
    let mut fifo = StatusFifo::new(ChannelNumber(0), 4);
    for (sub, residual) in [(1, 0), (2, 1), (1, 2), (3, 3)] {
        assert!(fifo.store(record(sub, residual)).is_ok());
    }
    fifo.purge_unit(SubAddress(1));
    assert_eq!(fifo.pop(), Some(record(2, 1)));
    assert_eq!(fifo.pop(), Some(record(3, 3)));
    assert_eq!(fifo.pop(), None);
    assert_eq!(fifo.capacity(), 4);
}
