//! In-process message bus for the Decision Arbitration Engine
//!
//! Sources and the resolver exchange typed envelopes through this bus; no
//! source talks to another directly. Delivery is FIFO per subscriber and
//! at-least-once for live subscribers; late joiners see no replay.
//! Publishers are never blocked: a slow subscriber's queue is bounded and
//! evicts oldest-first, with a `bus_overflow` diagnostic on the stream.

pub mod filter;

pub use filter::{EnvelopeClass, SubscriptionFilter};

use dae_core::{Envelope, OutboundEnvelope};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Notify;
use tracing::{debug, warn};

/// Default per-subscriber queue bound
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Bus traffic counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusStats {
    /// Envelopes accepted from publishers
    pub published: u64,

    /// Envelope deliveries into subscriber queues
    pub delivered: u64,

    /// Envelopes evicted from slow subscribers
    pub dropped: u64,
}

struct SubscriberShared {
    queue: Mutex<VecDeque<Arc<Envelope>>>,
    notify: Notify,
    closed: AtomicBool,
    dropped: AtomicU64,
}

struct SubscriberHandle {
    filter: SubscriptionFilter,
    label: String,
    shared: Arc<SubscriberShared>,
}

struct BusInner {
    subscribers: DashMap<u64, SubscriberHandle>,
    next_id: AtomicU64,
    capacity: usize,
    closed: AtomicBool,
    published: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

/// The shared publish/subscribe channel.
///
/// Cheap to clone; all clones address the same bus.
#[derive(Clone)]
pub struct MessageBus {
    inner: Arc<BusInner>,
}

impl MessageBus {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: DashMap::new(),
                next_id: AtomicU64::new(0),
                capacity: queue_capacity.max(1),
                closed: AtomicBool::new(false),
                published: AtomicU64::new(0),
                delivered: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Fan an envelope out to every matching subscriber. Never blocks the
    /// caller; full queues evict their oldest entry instead.
    pub fn publish(&self, envelope: impl Into<Envelope>) {
        let envelope = Arc::new(envelope.into());
        if self.inner.closed.load(Ordering::Acquire) {
            debug!("bus closed, envelope discarded");
            return;
        }
        self.inner.published.fetch_add(1, Ordering::Relaxed);

        // (subscriber label, evicted count) per overflowing queue this round
        let mut overflowed: Vec<(String, u64)> = Vec::new();

        for entry in self.inner.subscribers.iter() {
            let handle = entry.value();
            if !handle.filter.matches(&envelope) {
                continue;
            }
            let mut queue = handle.shared.queue.lock();
            if queue.len() >= self.inner.capacity {
                queue.pop_front();
                let total = handle.shared.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                if !envelope.is_overflow_diagnostic() {
                    overflowed.push((handle.label.clone(), total));
                }
            }
            queue.push_back(Arc::clone(&envelope));
            drop(queue);
            self.inner.delivered.fetch_add(1, Ordering::Relaxed);
            handle.shared.notify.notify_one();
        }

        // Overflow diagnostics are exempt from triggering further
        // diagnostics, so this recursion terminates after one level.
        for (subscriber, dropped) in overflowed {
            warn!(%subscriber, dropped, "bus_overflow: evicted oldest message");
            self.publish(OutboundEnvelope::BusOverflow { subscriber, dropped });
        }
    }

    /// Register a subscriber. Only traffic published after this call is
    /// observed (no replay).
    pub fn subscribe(&self, label: impl Into<String>, filter: SubscriptionFilter) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let shared = Arc::new(SubscriberShared {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(self.inner.closed.load(Ordering::Acquire)),
            dropped: AtomicU64::new(0),
        });
        self.inner.subscribers.insert(
            id,
            SubscriberHandle {
                filter,
                label: label.into(),
                shared: Arc::clone(&shared),
            },
        );
        Subscription {
            id,
            shared,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Stop accepting publishes and wake every receiver. Queued messages
    /// drain before `recv` starts returning `None`.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        for entry in self.inner.subscribers.iter() {
            entry.value().shared.closed.store(true, Ordering::Release);
            entry.value().shared.notify.notify_waiters();
            entry.value().shared.notify.notify_one();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }

    pub fn stats(&self) -> BusStats {
        BusStats {
            published: self.inner.published.load(Ordering::Relaxed),
            delivered: self.inner.delivered.load(Ordering::Relaxed),
            dropped: self.inner.dropped.load(Ordering::Relaxed),
        }
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBus")
            .field("subscribers", &self.subscriber_count())
            .field("capacity", &self.inner.capacity)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// A subscriber's receiving end. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    shared: Arc<SubscriberShared>,
    bus: Weak<BusInner>,
}

impl Subscription {
    /// Await the next matching envelope; `None` once the bus is closed and
    /// the queue has drained.
    pub async fn recv(&self) -> Option<Arc<Envelope>> {
        loop {
            if let Some(envelope) = self.shared.queue.lock().pop_front() {
                return Some(envelope);
            }
            if self.shared.closed.load(Ordering::Acquire) {
                // A publish may have raced the close; drain once more.
                return self.shared.queue.lock().pop_front();
            }
            self.shared.notify.notified().await;
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&self) -> Option<Arc<Envelope>> {
        self.shared.queue.lock().pop_front()
    }

    /// Messages evicted from this subscriber so far.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.shared.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.queue.lock().is_empty()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.subscribers.remove(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dae_core::{EnvelopeKind, InboundEnvelope};
    use serde_json::json;

    fn event(source: &str, n: u64) -> InboundEnvelope {
        InboundEnvelope::new(source, EnvelopeKind::Event, None, json!({ "n": n }))
    }

    #[tokio::test]
    async fn test_fifo_per_subscriber() {
        let bus = MessageBus::default();
        let sub = bus.subscribe("test", SubscriptionFilter::all());

        for n in 0..10 {
            bus.publish(event("anomaly-detector", n));
        }

        for n in 0..10 {
            let env = sub.recv().await.unwrap();
            match env.as_ref() {
                Envelope::Inbound(inner) => assert_eq!(inner.payload["n"], n),
                other => panic!("unexpected envelope: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_late_joiner_sees_no_replay() {
        let bus = MessageBus::default();
        bus.publish(event("anomaly-detector", 1));

        let sub = bus.subscribe("late", SubscriptionFilter::all());
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_overflow_evicts_oldest_and_emits_diagnostic() {
        let bus = MessageBus::new(4);
        let slow = bus.subscribe("slow", SubscriptionFilter::all());

        for n in 0..8 {
            bus.publish(event("anomaly-detector", n));
        }

        assert!(slow.dropped() > 0);
        assert_eq!(bus.stats().dropped, slow.dropped());

        // The oldest survivor is no longer n=0.
        let first = slow.recv().await.unwrap();
        if let Envelope::Inbound(inner) = first.as_ref() {
            assert!(inner.payload["n"].as_u64().unwrap() > 0);
        }

        // Somewhere in the stream there is a bus_overflow diagnostic.
        let mut saw_overflow = false;
        while let Some(env) = slow.try_recv() {
            if env.is_overflow_diagnostic() {
                saw_overflow = true;
            }
        }
        assert!(saw_overflow);
    }

    #[tokio::test]
    async fn test_close_drains_then_ends() {
        let bus = MessageBus::default();
        let sub = bus.subscribe("test", SubscriptionFilter::all());

        bus.publish(event("anomaly-detector", 1));
        bus.close();
        bus.publish(event("anomaly-detector", 2)); // discarded

        assert!(sub.recv().await.is_some());
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_dropping_subscription_unsubscribes() {
        let bus = MessageBus::default();
        let sub = bus.subscribe("test", SubscriptionFilter::all());
        assert_eq!(bus.subscriber_count(), 1);
        drop(sub);
        assert_eq!(bus.subscriber_count(), 0);
    }
}
