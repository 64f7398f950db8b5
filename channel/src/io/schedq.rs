use std::fmt::Debug;
use std::time::Duration;

use tracing::{event, Level};

use base::collections::pq::KeyedDeadlineQueue;
use base::prelude::*;

/// Deferred device completions, at most one per unit, ordered by
/// simulated due time.
#[derive(Debug)]
pub(crate) struct CompletionQueue {
    items: KeyedDeadlineQueue<UnitAddress, Duration>,
}

impl CompletionQueue {
    pub(crate) fn new() -> CompletionQueue {
        CompletionQueue {
            items: KeyedDeadlineQueue::new(),
        }
    }

    pub(crate) fn schedule(&mut self, unit: UnitAddress, due: Duration) -> Option<Duration> {
        let previous = self.items.schedule(unit, due);
        if let Some(prev) = previous {
            event!(
                Level::WARN,
                "unit {} completion moved from {:?} to {:?}",
                unit,
                prev,
                due
            );
        } else {
            event!(Level::TRACE, "unit {} completion due at {:?}", unit, due);
        }
        previous
    }

    pub(crate) fn cancel(&mut self, unit: &UnitAddress) -> Option<Duration> {
        let cancelled = self.items.cancel(unit);
        if let Some(due) = cancelled {
            event!(
                Level::DEBUG,
                "unit {} completion due at {:?} cancelled",
                unit,
                due
            );
        }
        cancelled
    }

    pub(crate) fn is_scheduled(&self, unit: &UnitAddress) -> bool {
        self.items.is_scheduled(unit)
    }

    pub(crate) fn next_due(&self) -> Option<Duration> {
        self.items.next_deadline().copied()
    }

    pub(crate) fn pop_due(&mut self, now: Duration) -> Option<(UnitAddress, Duration)> {
        self.items.pop_due(&now)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl Default for CompletionQueue {
    fn default() -> CompletionQueue {
        CompletionQueue::new()
    }
}

#[test]
fn test_completionqueue_empty() {
    let mut q = CompletionQueue::new();
    assert!(q.is_empty());
    assert_eq!(0, q.len());
    assert_eq!(q.next_due(), None);
    assert_eq!(q.pop_due(Duration::MAX), None);
}

#[test]
fn test_completionqueue_reschedule() {
    let unit = UnitAddress::new(0x20, 0);
    let mut q = CompletionQueue::new();
    assert_eq!(q.schedule(unit, Duration::from_micros(200)), None);
    assert_eq!(
        q.schedule(unit, Duration::from_micros(400)),
        Some(Duration::from_micros(200))
    );
    assert_eq!(q.pop_due(Duration::from_micros(300)), None);
    assert_eq!(
        q.pop_due(Duration::from_micros(400)),
        Some((unit, Duration::from_micros(400)))
    );
    assert!(q.is_empty());
}

#[test]
fn test_completionqueue_order() {
    let a = UnitAddress::new(0x20, 1);
    let b = UnitAddress::new(0x20, 2);
    let c = UnitAddress::new(0x21, 0);
    let mut q = CompletionQueue::new();
    q.schedule(b, Duration::from_micros(10));
    q.schedule(a, Duration::from_micros(10));
    q.schedule(c, Duration::from_micros(5));
    assert_eq!(q.cancel(&c), Some(Duration::from_micros(5)));
    assert!(!q.is_scheduled(&c));
    assert_eq!(q.next_due(), Some(Duration::from_micros(10)));
    let now = Duration::from_micros(10);
    assert_eq!(q.pop_due(now).map(|(u, _)| u), Some(b));
    assert_eq!(q.pop_due(now).map(|(u, _)| u), Some(a));
}
