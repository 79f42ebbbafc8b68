//! Fire-and-forget "order placed" notifications.
//!
//! The order path only hands an [`OrderPlaced`] to an [`OrderNotifier`]; it
//! never waits for delivery and never fails because of it. Delivery happens on
//! a background worker that feeds a [`NotificationSink`].

use std::sync::{Arc, mpsc};

use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use stockflow_events::{Event, EventBus, EventEnvelope};
use stockflow_orders::{OrderEvent, OrderPlaced};

/// Receives a copy of every successfully placed order.
///
/// Implementations must return promptly and must not panic.
pub trait OrderNotifier: Send + Sync {
    fn order_placed(&self, event: OrderPlaced);
}

impl<N: OrderNotifier + ?Sized> OrderNotifier for Arc<N> {
    fn order_placed(&self, event: OrderPlaced) {
        (**self).order_placed(event)
    }
}

/// Discards notifications.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl OrderNotifier for NoopNotifier {
    fn order_placed(&self, _event: OrderPlaced) {}
}

/// Enqueues notifications for a [`crate::workers::NotificationWorker`].
#[derive(Debug, Clone)]
pub struct QueuedNotifier {
    queue: mpsc::Sender<OrderPlaced>,
}

impl QueuedNotifier {
    pub(crate) fn new(queue: mpsc::Sender<OrderPlaced>) -> Self {
        Self { queue }
    }
}

impl OrderNotifier for QueuedNotifier {
    fn order_placed(&self, event: OrderPlaced) {
        let order_id = event.order_id;
        if self.queue.send(event).is_err() {
            warn!(%order_id, "notification worker stopped; dropping order-placed notification");
        }
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("failed to encode notification: {0}")]
    Encode(String),

    #[error("failed to publish notification: {0}")]
    Publish(String),
}

/// Final destination of a notification, driven by the worker thread.
pub trait NotificationSink: Send {
    fn deliver(&mut self, event: &OrderPlaced) -> Result<(), NotifyError>;
}

/// Writes each notification as a structured log line.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingSink;

impl NotificationSink for LoggingSink {
    fn deliver(&mut self, event: &OrderPlaced) -> Result<(), NotifyError> {
        info!(
            order_id = %event.order_id,
            user_id = %event.user_id,
            lines = event.lines.len(),
            total = %event.total_amount,
            "order placed notification"
        );
        Ok(())
    }
}

/// Aggregate type carried on published order envelopes.
pub const ORDER_AGGREGATE_TYPE: &str = "orders.order";

/// Publishes notifications as JSON envelopes on an [`EventBus`].
#[derive(Debug)]
pub struct BusSink<B> {
    bus: B,
}

impl<B> BusSink<B>
where
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(bus: B) -> Self {
        Self { bus }
    }
}

impl<B> NotificationSink for BusSink<B>
where
    B: EventBus<EventEnvelope<JsonValue>>,
{
    fn deliver(&mut self, event: &OrderPlaced) -> Result<(), NotifyError> {
        let aggregate_id = *event.order_id.as_uuid();
        let event = OrderEvent::OrderPlaced(event.clone());
        let event_type = event.event_type();
        let payload = serde_json::to_value(&event).map_err(|e| NotifyError::Encode(e.to_string()))?;

        // A placed order is always at version 1.
        let envelope = EventEnvelope::new(
            Uuid::now_v7(),
            aggregate_id,
            ORDER_AGGREGATE_TYPE,
            1,
            event_type,
            payload,
        );

        self.bus
            .publish(envelope)
            .map_err(|e| NotifyError::Publish(format!("{e:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chrono::Utc;
    use stockflow_core::{OrderId, UserId};
    use stockflow_events::InMemoryEventBus;

    fn placed() -> OrderPlaced {
        OrderPlaced {
            order_id: OrderId::new(),
            user_id: UserId::new(),
            lines: vec![],
            total_amount: "0".parse().unwrap(),
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn bus_sink_publishes_an_envelope() {
        let bus = Arc::new(InMemoryEventBus::<EventEnvelope<JsonValue>>::new());
        let sub = bus.subscribe();
        let mut sink = BusSink::new(bus.clone());

        let event = placed();
        sink.deliver(&event).unwrap();

        let envelope = sub.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(envelope.aggregate_id(), *event.order_id.as_uuid());
        assert_eq!(envelope.aggregate_type(), ORDER_AGGREGATE_TYPE);
        assert_eq!(envelope.event_type(), "orders.order.placed");
        assert_eq!(envelope.aggregate_version(), 1);
    }

    #[test]
    fn queued_notifier_survives_a_stopped_worker() {
        let (tx, rx) = mpsc::channel();
        drop(rx);
        QueuedNotifier::new(tx).order_placed(placed());
    }
}
