use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::document::DocumentStatus;
use crate::maintenance::MaintenanceOp;

/// Default capacity of a queue's event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Metadata envelope attached to every queue event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventMeta {
    pub version: u16,
    pub event_id: Uuid,
    pub queue: String,
    pub timestamp: DateTime<Utc>,
}

impl EventMeta {
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            version: 1,
            event_id: Uuid::now_v7(),
            queue: queue.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Queue event with metadata and payload.
#[derive(Clone, Debug)]
pub struct QueueEvent {
    pub meta: EventMeta,
    pub payload: QueueEventPayload,
}

impl QueueEvent {
    pub fn new(queue: impl Into<String>, payload: QueueEventPayload) -> Self {
        Self {
            meta: EventMeta::new(queue),
            payload,
        }
    }

    /// Whether the event means new work may be pickable.
    pub fn is_wake(&self) -> bool {
        match &self.payload {
            QueueEventPayload::Pushed { pending, .. } => *pending > 0,
            QueueEventPayload::Maintained {
                operation,
                affected,
            } => *affected > 0 && operation.wakes_workers(),
            _ => false,
        }
    }
}

/// Event payload emitted for queue transitions.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum QueueEventPayload {
    /// Documents were pushed.
    Pushed {
        created: u64,
        skipped: u64,
        pending: u64,
    },
    /// Documents were claimed by a pick.
    Picked { count: usize },
    /// A document was resolved by a worker or caller.
    Resolved {
        subject: String,
        action: &'static str,
        status: DocumentStatus,
    },
    /// A document was removed.
    Dropped { subject: String },
    /// A maintenance operation ran.
    Maintained {
        operation: MaintenanceOp,
        affected: u64,
    },
}

/// In-process fan-out bus for one queue's events.
///
/// Publishing never blocks; a subscriber that falls behind receives
/// `RecvError::Lagged` and should treat it as a wake-up.
pub struct QueueEvents {
    sender: broadcast::Sender<QueueEvent>,
    capacity: usize,
}

impl std::fmt::Debug for QueueEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueEvents")
            .field("capacity", &self.capacity)
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

impl Default for QueueEvents {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl QueueEvents {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender, capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Publish an event. Without subscribers the event is dropped.
    pub fn publish(&self, event: QueueEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribe to events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn pushed(pending: u64) -> QueueEvent {
        QueueEvent::new(
            "q1",
            QueueEventPayload::Pushed {
                created: pending,
                skipped: 0,
                pending,
            },
        )
    }

    #[tokio::test]
    async fn test_event_bus_broadcast_to_multiple_subscribers() {
        let bus = QueueEvents::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        for _ in 0..3 {
            bus.publish(pushed(1));
        }

        for _ in 0..3 {
            let event = timeout(Duration::from_millis(100), rx1.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(event.meta.queue, "q1");
            assert!(timeout(Duration::from_millis(100), rx2.recv())
                .await
                .is_ok());
        }
    }

    #[tokio::test]
    async fn test_lagged_subscriber_doesnt_block_publisher() {
        let bus = QueueEvents::new(2);
        let mut rx = bus.subscribe();

        for _ in 0..5 {
            bus.publish(pushed(1));
        }

        match rx.recv().await {
            Err(broadcast::error::RecvError::Lagged(skipped)) => assert!(skipped > 0),
            other => panic!("expected lag, got {other:?}"),
        }
    }

    #[test]
    fn test_wake_classification() {
        assert!(pushed(1).is_wake());
        assert!(!pushed(0).is_wake());

        let reclaimed = QueueEvent::new(
            "q1",
            QueueEventPayload::Maintained {
                operation: MaintenanceOp::RescheduleOrphans,
                affected: 2,
            },
        );
        assert!(reclaimed.is_wake());

        let killed = QueueEvent::new(
            "q1",
            QueueEventPayload::Maintained {
                operation: MaintenanceOp::KillOrphans,
                affected: 2,
            },
        );
        assert!(!killed.is_wake());

        let picked = QueueEvent::new("q1", QueueEventPayload::Picked { count: 1 });
        assert!(!picked.is_wake());
    }

    #[test]
    fn test_event_bus_debug_format() {
        let bus = QueueEvents::new(100);
        let _rx = bus.subscribe();
        let debug_str = format!("{:?}", bus);
        assert!(debug_str.contains("QueueEvents"));
        assert!(debug_str.contains("subscribers: 1"));
        assert!(debug_str.contains("capacity: 100"));
    }
}
