//! Per-connection outbound delivery queue.
//!
//! Every live connection (chat socket or notification stream) owns exactly
//! one bounded FIFO queue. Producers enqueue from any task; a single writer
//! drains in order to the network. The bound is what decouples broadcast
//! speed from slow consumers: when the queue is full the oldest droppable
//! event is evicted, and a critical event that cannot fit closes the queue,
//! which the session turns into a forced disconnect.

use std::collections::VecDeque;
use tokio::sync::{Mutex, Notify};

/// Delivery class of an outbound event.
///
/// Critical events (`message`, `read_receipt`, `connected`) are never
/// silently dropped. Droppable events are superseded by later state anyway:
/// typing indicators, presence churn, keepalives, and notifications (which
/// are already durable in the backlog before any live push).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventClass {
    Critical,
    Droppable,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub class: EventClass,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Enqueued,
    /// Enqueued after evicting the oldest droppable event.
    EvictedOldest,
    /// The incoming droppable event was discarded instead.
    DroppedIncoming,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushError {
    /// Queue was closed; the connection is gone or being torn down.
    Closed,
    /// Queue full of critical events and the incoming event is critical too.
    /// The producer must treat the connection as non-responsive.
    Overflow,
}

struct Inner {
    items: VecDeque<Envelope>,
    closed: bool,
    dropped: u64,
}

pub struct DeliveryQueue {
    capacity: usize,
    inner: Mutex<Inner>,
    notify: Notify,
}

impl DeliveryQueue {
    pub fn new(capacity: usize) -> Self {
        DeliveryQueue {
            capacity: capacity.max(1),
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                closed: false,
                dropped: 0,
            }),
            notify: Notify::new(),
        }
    }

    pub async fn push(
        &self,
        class: EventClass,
        payload: serde_json::Value,
    ) -> Result<PushOutcome, PushError> {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return Err(PushError::Closed);
        }

        let mut outcome = PushOutcome::Enqueued;
        if inner.items.len() >= self.capacity {
            let victim = inner
                .items
                .iter()
                .position(|e| e.class == EventClass::Droppable);
            match victim {
                Some(idx) => {
                    inner.items.remove(idx);
                    inner.dropped += 1;
                    outcome = PushOutcome::EvictedOldest;
                }
                None if class == EventClass::Critical => return Err(PushError::Overflow),
                None => {
                    inner.dropped += 1;
                    return Ok(PushOutcome::DroppedIncoming);
                }
            }
        }

        inner.items.push_back(Envelope { class, payload });
        drop(inner);
        self.notify.notify_one();
        Ok(outcome)
    }

    /// Waits for the next event in FIFO order. Returns `None` once the queue
    /// is closed and drained, which is the writer's signal to terminate.
    pub async fn pop(&self) -> Option<Envelope> {
        loop {
            let notified = self.notify.notified();
            {
                let mut inner = self.inner.lock().await;
                if let Some(envelope) = inner.items.pop_front() {
                    return Some(envelope);
                }
                if inner.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Closes the queue. Pending events are discarded; the writer wakes and
    /// observes termination. Idempotent.
    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        inner.closed = true;
        inner.items.clear();
        drop(inner);
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    pub async fn is_closed(&self) -> bool {
        self.inner.lock().await.closed
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.items.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Number of droppable events discarded so far, for the stats surface.
    pub async fn dropped_count(&self) -> u64 {
        self.inner.lock().await.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_fifo_order() {
        let q = DeliveryQueue::new(8);
        for i in 0..5 {
            q.push(EventClass::Critical, json!({ "seq": i })).await.unwrap();
        }
        for i in 0..5 {
            let env = q.pop().await.unwrap();
            assert_eq!(env.payload["seq"], i);
        }
    }

    #[tokio::test]
    async fn test_full_queue_evicts_oldest_droppable() {
        let q = DeliveryQueue::new(2);
        q.push(EventClass::Droppable, json!({ "n": 0 })).await.unwrap();
        q.push(EventClass::Droppable, json!({ "n": 1 })).await.unwrap();

        let outcome = q.push(EventClass::Droppable, json!({ "n": 2 })).await.unwrap();
        assert_eq!(outcome, PushOutcome::EvictedOldest);
        assert_eq!(q.len().await, 2);
        assert_eq!(q.dropped_count().await, 1);

        // Oldest (n=0) is gone, order of the rest preserved.
        assert_eq!(q.pop().await.unwrap().payload["n"], 1);
        assert_eq!(q.pop().await.unwrap().payload["n"], 2);
    }

    #[tokio::test]
    async fn test_critical_event_evicts_droppable_but_never_another_critical() {
        let q = DeliveryQueue::new(2);
        q.push(EventClass::Droppable, json!({ "n": 0 })).await.unwrap();
        q.push(EventClass::Critical, json!({ "n": 1 })).await.unwrap();

        let outcome = q.push(EventClass::Critical, json!({ "n": 2 })).await.unwrap();
        assert_eq!(outcome, PushOutcome::EvictedOldest);

        // Queue now holds only critical events; another critical overflows.
        let err = q.push(EventClass::Critical, json!({ "n": 3 })).await.unwrap_err();
        assert_eq!(err, PushError::Overflow);

        // But a droppable event is simply discarded, not an error.
        let outcome = q.push(EventClass::Droppable, json!({ "n": 4 })).await.unwrap();
        assert_eq!(outcome, PushOutcome::DroppedIncoming);
        assert_eq!(q.len().await, 2);
    }

    #[tokio::test]
    async fn test_close_wakes_consumer() {
        let q = std::sync::Arc::new(DeliveryQueue::new(4));
        let consumer = {
            let q = q.clone();
            tokio::spawn(async move { q.pop().await })
        };
        q.close().await;
        assert_eq!(consumer.await.unwrap(), None);
        assert_eq!(
            q.push(EventClass::Critical, json!({})).await.unwrap_err(),
            PushError::Closed
        );
    }

    #[tokio::test]
    async fn test_bounded_never_grows_past_capacity() {
        let q = DeliveryQueue::new(4);
        for i in 0..100 {
            let _ = q.push(EventClass::Droppable, json!({ "n": i })).await;
        }
        assert_eq!(q.len().await, 4);
        assert_eq!(q.dropped_count().await, 96);
    }
}
