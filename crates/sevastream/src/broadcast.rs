//! Fan-out of stream events to observers.
//!
//! Every subscriber owns a bounded queue. Publishing never waits: an event is
//! pushed into each queue with `try_send`, so a slow or dead observer cannot
//! backpressure the scheduler. A subscriber whose queue is full is dropped
//! (its receiver drains what was queued, then sees the channel close); one
//! whose receiver was dropped is removed on the next publish.
//!
//! Ordering: each stream publishes from a single task while holding its tick
//! gate, and every queue is FIFO, so each subscriber sees a given stream's
//! events in the order they were produced. Nothing is promised across streams.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use crate::event::StreamEvent;
use crate::stream::Stream;

/// Default per-subscriber queue depth.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 1024;

/// Handle identifying one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriberId(u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// A live feed plus the state of the world when it was opened.
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriberId,
    /// Streams that were active at subscribe time. Events racing with the
    /// snapshot may show up both here and in the feed.
    pub snapshot: Vec<Stream>,
    receiver: mpsc::Receiver<StreamEvent>,
}

impl Subscription {
    /// Next event, or `None` once the subscription is closed and drained.
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        self.receiver.recv().await
    }

    /// Next already-queued event without waiting.
    pub fn try_recv(&mut self) -> Option<StreamEvent> {
        self.receiver.try_recv().ok()
    }

    /// Everything queued right now.
    pub fn drain(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.receiver.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Publish/subscribe hub with one queue per observer.
pub struct EventBroadcaster {
    subscribers: DashMap<SubscriberId, mpsc::Sender<StreamEvent>>,
    next_id: AtomicU64,
    buffer: usize,
}

impl EventBroadcaster {
    pub fn new(buffer: usize) -> Self {
        Self {
            subscribers: DashMap::new(),
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
        }
    }

    /// Register a new observer. The snapshot is supplied by the caller
    /// (normally the scheduler) after the queue is registered, so nothing
    /// published afterwards is missed.
    pub fn subscribe_with<F>(&self, snapshot: F) -> Subscription
    where
        F: FnOnce() -> Vec<Stream>,
    {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.buffer);
        self.subscribers.insert(id, tx);
        debug!(subscriber = %id, "Subscriber registered");

        Subscription {
            id,
            snapshot: snapshot(),
            receiver: rx,
        }
    }

    /// Register an observer with an empty snapshot.
    pub fn subscribe(&self) -> Subscription {
        self.subscribe_with(Vec::new)
    }

    /// Remove an observer. Returns false if it was already gone.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let removed = self.subscribers.remove(&id).is_some();
        if removed {
            debug!(subscriber = %id, "Subscriber removed");
        }
        removed
    }

    /// Deliver `event` to every current subscriber without blocking.
    pub fn publish(&self, event: &StreamEvent) {
        let mut evicted = Vec::new();

        for entry in self.subscribers.iter() {
            match entry.value().try_send(event.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(
                        subscriber = %entry.key(),
                        event_type = event.event_type(),
                        "Subscriber queue full, dropping subscriber"
                    );
                    evicted.push(*entry.key());
                }
                Err(TrySendError::Closed(_)) => evicted.push(*entry.key()),
            }
        }

        // Removal must happen after the iterator releases its shard locks.
        for id in evicted {
            self.subscribers.remove(&id);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_BUFFER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ActiveSummary;

    fn summary() -> StreamEvent {
        StreamEvent::Summary(ActiveSummary::from_streams(std::iter::empty()))
    }

    #[tokio::test]
    async fn test_every_subscriber_receives_each_event() {
        let hub = EventBroadcaster::default();
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();

        hub.publish(&summary());

        assert_eq!(a.recv().await.map(|e| e.event_type()), Some("summary"));
        assert_eq!(b.recv().await.map(|e| e.event_type()), Some("summary"));
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let hub = EventBroadcaster::default();
        let mut sub = hub.subscribe();

        assert!(hub.unsubscribe(sub.id));
        assert!(!hub.unsubscribe(sub.id));
        hub.publish(&summary());

        assert!(sub.recv().await.is_none());
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_full_subscriber_is_dropped_without_affecting_others() {
        let hub = EventBroadcaster::new(2);
        let mut slow = hub.subscribe();
        let mut fast = hub.subscribe();

        for _ in 0..2 {
            hub.publish(&summary());
            assert!(fast.try_recv().is_some());
        }
        // slow never read; its queue is full now
        hub.publish(&summary());

        assert_eq!(hub.subscriber_count(), 1);
        assert!(fast.try_recv().is_some());

        // slow still gets what was queued before it was dropped
        assert_eq!(slow.drain().len(), 2);
        assert!(slow.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_pruned_on_publish() {
        let hub = EventBroadcaster::default();
        let sub = hub.subscribe();
        drop(sub);

        assert_eq!(hub.subscriber_count(), 1);
        hub.publish(&summary());
        assert_eq!(hub.subscriber_count(), 0);
    }
}
