//! Bounded event queue between the IO thread and the poller
//!
//! The IO thread owns the [`EventSink`] and is the only producer. The
//! connection owns the [`EventSource`]. When the queue is full the
//! [`OverflowPolicy`] decides which event is lost; every loss is counted and
//! reported once through [`EventSource::take_overflow`].

use crate::command::Timeout;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use thiserror::Error;
use ziapi_protocol::Event;

/// Which event is discarded on overflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Discard the oldest queued event, keep the newest
    #[default]
    DropOldest,
    /// Discard the incoming event
    DropNewest,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Event queue closed")]
pub struct QueueClosed;

#[derive(Debug, Default)]
struct Shared {
    /// Drops not yet reported to the poller
    pending: AtomicU64,
    total: AtomicU64,
    source_alive: AtomicBool,
}

/// Constructor namespace for the queue halves
pub struct EventQueue;

impl EventQueue {
    pub fn bounded(capacity: usize, policy: OverflowPolicy) -> (EventSink, EventSource) {
        let capacity = capacity.max(1);
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        let shared = Arc::new(Shared {
            source_alive: AtomicBool::new(true),
            ..Shared::default()
        });
        (
            EventSink {
                tx,
                evict: rx.clone(),
                policy,
                shared: shared.clone(),
            },
            EventSource {
                rx,
                capacity,
                shared,
            },
        )
    }
}

/// Producer half
pub struct EventSink {
    tx: Sender<Event>,
    /// Used to evict the head under [`OverflowPolicy::DropOldest`]
    evict: Receiver<Event>,
    policy: OverflowPolicy,
    shared: Arc<Shared>,
}

impl EventSink {
    /// Enqueue `event` without blocking.
    ///
    /// Returns how many events were lost to make the push fit.
    pub fn push(&self, event: Event) -> Result<u64, QueueClosed> {
        if !self.shared.source_alive.load(Ordering::Acquire) {
            return Err(QueueClosed);
        }
        let mut event = match self.tx.try_send(event) {
            Ok(()) => return Ok(0),
            Err(TrySendError::Disconnected(_)) => return Err(QueueClosed),
            Err(TrySendError::Full(event)) => event,
        };

        let dropped = match self.policy {
            OverflowPolicy::DropNewest => 1,
            OverflowPolicy::DropOldest => {
                let mut dropped = 0;
                loop {
                    // The poller may win the race for the head; then there is room anyway.
                    if self.evict.try_recv().is_ok() {
                        dropped += 1;
                    }
                    match self.tx.try_send(event) {
                        Ok(()) => break,
                        Err(TrySendError::Full(back)) => event = back,
                        Err(TrySendError::Disconnected(_)) => return Err(QueueClosed),
                    }
                }
                dropped
            },
        };
        if dropped > 0 {
            self.shared.pending.fetch_add(dropped, Ordering::AcqRel);
            self.shared.total.fetch_add(dropped, Ordering::Relaxed);
        }
        Ok(dropped)
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }
}

/// Consumer half
pub struct EventSource {
    rx: Receiver<Event>,
    capacity: usize,
    shared: Arc<Shared>,
}

impl EventSource {
    /// Next event within `timeout`; `Ok(None)` when none arrived.
    ///
    /// Events queued before the producer went away are still returned;
    /// after that the queue reports [`QueueClosed`].
    pub fn pop(&self, timeout: Timeout) -> Result<Option<Event>, QueueClosed> {
        match timeout {
            Timeout::Infinite => self.rx.recv().map(Some).map_err(|_| QueueClosed),
            Timeout::Immediate => match self.rx.try_recv() {
                Ok(event) => Ok(Some(event)),
                Err(TryRecvError::Empty) => Ok(None),
                Err(TryRecvError::Disconnected) => Err(QueueClosed),
            },
            Timeout::After(d) => match self.rx.recv_timeout(d) {
                Ok(event) => Ok(Some(event)),
                Err(RecvTimeoutError::Timeout) => Ok(None),
                Err(RecvTimeoutError::Disconnected) => Err(QueueClosed),
            },
        }
    }

    /// Drops since the last call, if any.
    pub fn take_overflow(&self) -> Option<u64> {
        match self.shared.pending.swap(0, Ordering::AcqRel) {
            0 => None,
            n => Some(n),
        }
    }

    pub fn total_dropped(&self) -> u64 {
        self.shared.total.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Drop for EventSource {
    fn drop(&mut self) {
        self.shared.source_alive.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::time::Duration;
    use ziapi_protocol::{NodePath, Payload};

    fn event(n: u64) -> Event {
        Event::new(
            NodePath::new("/dev1/demods/0/sample").unwrap(),
            Payload::IntegerScalar(vec![n as i64]),
        )
    }

    fn value(e: &Event) -> i64 {
        match &e.payload {
            Payload::IntegerScalar(v) => v[0],
            other => panic!("unexpected payload {:?}", other),
        }
    }

    fn drain(source: &EventSource) -> Vec<i64> {
        std::iter::from_fn(|| source.pop(Timeout::Immediate).unwrap())
            .map(|e| value(&e))
            .collect()
    }

    #[test]
    fn test_pop_timeouts() {
        let (sink, source) = EventQueue::bounded(4, OverflowPolicy::DropOldest);
        assert_eq!(source.pop(Timeout::Immediate), Ok(None));
        assert_eq!(
            source.pop(Timeout::After(Duration::from_millis(5))),
            Ok(None)
        );
        sink.push(event(7)).unwrap();
        assert_eq!(source.len(), 1);
        assert_eq!(value(&source.pop(Timeout::Infinite).unwrap().unwrap()), 7);
    }

    #[test]
    fn test_drop_newest_keeps_head() {
        let (sink, source) = EventQueue::bounded(2, OverflowPolicy::DropNewest);
        for n in 0..5 {
            sink.push(event(n)).unwrap();
        }
        assert_eq!(source.take_overflow(), Some(3));
        assert_eq!(drain(&source), vec![0, 1]);
    }

    #[test]
    fn test_closed_after_sink_dropped_and_drained() {
        let (sink, source) = EventQueue::bounded(2, OverflowPolicy::DropOldest);
        sink.push(event(1)).unwrap();
        drop(sink);
        assert_eq!(value(&source.pop(Timeout::Infinite).unwrap().unwrap()), 1);
        assert_eq!(source.pop(Timeout::Infinite), Err(QueueClosed));
    }

    #[test]
    fn test_push_fails_without_source() {
        let (sink, source) = EventQueue::bounded(2, OverflowPolicy::DropOldest);
        drop(source);
        assert_eq!(sink.push(event(1)), Err(QueueClosed));
    }

    proptest! {
        #[test]
        fn prop_drop_oldest_keeps_newest_in_order(capacity in 1usize..32, extra in 0usize..64) {
            let (sink, source) = EventQueue::bounded(capacity, OverflowPolicy::DropOldest);
            let total = capacity + extra;
            for n in 0..total {
                sink.push(event(n as u64)).unwrap();
            }

            let expected: Vec<i64> = ((total - capacity)..total).map(|n| n as i64).collect();
            let overflow = source.take_overflow();
            prop_assert_eq!(drain(&source), expected);
            if extra == 0 {
                prop_assert_eq!(overflow, None);
            } else {
                prop_assert_eq!(overflow, Some(extra as u64));
            }
            // Reported exactly once.
            prop_assert_eq!(source.take_overflow(), None);
            prop_assert_eq!(source.total_dropped(), extra as u64);
        }

        #[test]
        fn prop_fifo_without_overflow(values in proptest::collection::vec(any::<u32>(), 0..64)) {
            let (sink, source) = EventQueue::bounded(64, OverflowPolicy::DropNewest);
            for v in &values {
                sink.push(event(*v as u64)).unwrap();
            }
            let expected: Vec<i64> = values.iter().map(|v| *v as i64).collect();
            prop_assert_eq!(drain(&source), expected);
        }
    }
}
