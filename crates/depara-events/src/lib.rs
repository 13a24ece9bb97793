#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls
)]
#![warn(
    missing_docs,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery
)]
#![allow(clippy::module_name_repetitions)]

//! Engine event bus: scheduler, batch and backup transitions fan out to any number of
//! subscribers.
//!
//! Every event gets a sequential id. A bounded ring keeps the newest events so a subscriber
//! that reconnects with its last seen id picks up what it missed; live delivery rides on
//! `tokio::broadcast`, and slow subscribers lose the oldest events rather than blocking
//! publishers.

mod payloads;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::{Receiver, Sender};
use tracing::warn;

pub use payloads::{DEFAULT_REPLAY_CAPACITY, Event, EventEnvelope, EventId};

/// Cloneable handle to the engine event bus.
#[derive(Clone)]
pub struct EventBus {
    sender: Sender<EventEnvelope>,
    buffer: Arc<Mutex<VecDeque<EventEnvelope>>>,
    next_id: Arc<AtomicU64>,
    replay_capacity: usize,
}

impl EventBus {
    /// Bus whose replay ring and broadcast channel both hold `capacity` events (at least one).
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            buffer: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            next_id: Arc::new(AtomicU64::new(1)),
            replay_capacity: capacity,
        }
    }

    /// Bus sized with [`DEFAULT_REPLAY_CAPACITY`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_REPLAY_CAPACITY)
    }

    /// Stamp `event` with the next id and deliver it. Returns the id.
    pub fn publish(&self, event: Event) -> EventId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let envelope = EventEnvelope {
            id,
            timestamp: Utc::now(),
            event,
        };

        {
            let mut buffer = self.lock_buffer();
            if buffer.len() == self.replay_capacity {
                buffer.pop_front();
            }
            buffer.push_back(envelope.clone());
        }

        // No subscribers is not an error; the replay buffer still holds the event.
        let _ = self.sender.send(envelope);
        id
    }

    /// Live stream, preceded by buffered events newer than `since_id` when one is given.
    #[must_use]
    pub fn subscribe(&self, since_id: Option<EventId>) -> EventStream {
        let backlog = since_id.map_or_else(VecDeque::new, |since| {
            self.lock_buffer()
                .iter()
                .filter(|item| item.id > since)
                .cloned()
                .collect()
        });

        let receiver = self.sender.subscribe();
        EventStream { backlog, receiver }
    }

    /// Id of the newest buffered event.
    #[must_use]
    pub fn last_event_id(&self) -> Option<EventId> {
        self.lock_buffer().back().map(|event| event.id)
    }

    /// Buffered events emitted after the specified id.
    #[must_use]
    pub fn backlog_since(&self, id: EventId) -> Vec<EventEnvelope> {
        self.lock_buffer()
            .iter()
            .filter(|env| env.id > id)
            .cloned()
            .collect()
    }

    fn lock_buffer(&self) -> MutexGuard<'_, VecDeque<EventEnvelope>> {
        self.buffer.lock().unwrap_or_else(|poisoned| {
            warn!("event replay buffer lock poisoned; recovering");
            PoisonError::into_inner(poisoned)
        })
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Subscriber side of the bus: replayed events first, then live ones.
pub struct EventStream {
    backlog: VecDeque<EventEnvelope>,
    receiver: Receiver<EventEnvelope>,
}

impl EventStream {
    /// Next event; `None` once every bus handle is gone.
    pub async fn next(&mut self) -> Option<EventEnvelope> {
        if let Some(event) = self.backlog.pop_front() {
            return Some(event);
        }

        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event subscriber lagged; dropping oldest events");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Receive an already-published event without waiting.
    pub fn try_next(&mut self) -> Option<EventEnvelope> {
        if let Some(event) = self.backlog.pop_front() {
            return Some(event);
        }
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => {}
                Err(_) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(operation_id: &str, percentage: i16) -> Event {
        Event::BatchProgress {
            operation_id: operation_id.to_string(),
            percentage,
            total: 10,
        }
    }

    #[tokio::test]
    async fn reconnecting_subscriber_replays_missed_run_events() {
        let bus = EventBus::with_capacity(16);
        let scheduled = bus.publish(Event::OperationScheduled {
            operation_id: "op1".into(),
            action: "move".into(),
            frequency: "30s".into(),
        });
        bus.publish(Event::OperationStarted {
            operation_id: "op1".into(),
            batch: true,
        });
        bus.publish(progress("op1", 50));
        assert_eq!(scheduled, 1);

        let mut stream = bus.subscribe(Some(scheduled));
        let mut kinds = Vec::new();
        for _ in 0..2 {
            if let Some(envelope) = stream.next().await {
                kinds.push(envelope.event.kind());
            }
        }
        assert_eq!(kinds, ["operation_started", "batch_progress"]);

        let live = bus.publish(Event::OperationCancelled {
            operation_id: "op1".into(),
        });
        assert_eq!(stream.next().await.map(|envelope| envelope.id), Some(live));
    }

    #[test]
    fn replay_buffer_keeps_the_newest_events() {
        let bus = EventBus::with_capacity(2);
        for percentage in [10, 20, 30, 40] {
            bus.publish(progress("op1", percentage));
        }
        let ids: Vec<_> = bus.backlog_since(0).iter().map(|env| env.id).collect();
        assert_eq!(ids, [3, 4]);
        assert_eq!(bus.last_event_id(), Some(4));
        assert!(bus.backlog_since(4).is_empty());
    }

    #[test]
    fn try_next_drains_live_events() {
        let bus = EventBus::new();
        let mut stream = bus.subscribe(None);
        assert!(stream.try_next().is_none());
        let id = bus.publish(Event::OperationCancelled {
            operation_id: "op1".into(),
        });
        let envelope = stream.try_next();
        assert_eq!(envelope.as_ref().map(|env| env.id), Some(id));
        assert_eq!(
            envelope.map(|env| env.event.kind()),
            Some("operation_cancelled")
        );
    }

    #[tokio::test]
    async fn lagging_subscriber_resumes_at_the_oldest_retained_event() {
        let bus = EventBus::with_capacity(4);
        let mut stream = bus.subscribe(None);
        for percentage in 0..10 {
            bus.publish(progress("bulk", percentage));
        }
        let first = stream.next().await.map(|envelope| envelope.id);
        assert_eq!(first, Some(7));
        let mut last = first;
        while let Some(envelope) = stream.try_next() {
            last = Some(envelope.id);
        }
        assert_eq!(last, Some(10));
    }
}
