//! Notification fan-out for raw webhook activity.
//!
//! Every webhook body is published once, before classification, whatever
//! happens to it afterwards. Observers (a live activity view, an audit
//! sink) subscribe; publishing never waits on them and never fails the
//! webhook.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::trace;

use crate::types::CorrelationId;

/// Topic for raw inbound webhook bodies.
pub const ACTIVITY_TOPIC: &str = "activity_event";

/// Default number of buffered events per subscriber before old ones are dropped.
pub const DEFAULT_CAPACITY: usize = 256;

/// One raw inbound webhook body, tagged for correlation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub internal_id: CorrelationId,
    pub received_at: DateTime<Utc>,
    pub event: Value,
}

impl ActivityEvent {
    /// Wraps a raw body with a fresh correlation id.
    pub fn new(event: Value) -> Self {
        ActivityEvent {
            internal_id: CorrelationId::generate(),
            received_at: Utc::now(),
            event,
        }
    }
}

/// A published event together with its topic.
#[derive(Debug, Clone, PartialEq)]
pub struct Published {
    pub topic: String,
    pub activity: ActivityEvent,
}

/// Fire-and-forget publisher.
pub trait NotificationFanout: Send + Sync {
    fn publish(&self, topic: &str, activity: ActivityEvent);
}

/// In-process fan-out over a tokio broadcast channel.
///
/// Slow subscribers lag and lose the oldest events rather than holding
/// up publishers.
#[derive(Debug, Clone)]
pub struct BroadcastFanout {
    sender: broadcast::Sender<Published>,
}

impl BroadcastFanout {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        BroadcastFanout { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Published> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastFanout {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl NotificationFanout for BroadcastFanout {
    fn publish(&self, topic: &str, activity: ActivityEvent) {
        let internal_id = activity.internal_id;
        let delivered = self
            .sender
            .send(Published {
                topic: topic.to_string(),
                activity,
            })
            .unwrap_or(0);
        trace!(topic, %internal_id, subscribers = delivered, "Published activity");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let fanout = BroadcastFanout::default();
        let mut rx = fanout.subscribe();

        let activity = ActivityEvent::new(json!({ "for_user_id": "1" }));
        fanout.publish(ACTIVITY_TOPIC, activity.clone());

        let received = rx.recv().await.unwrap();
        assert_eq!(received.topic, ACTIVITY_TOPIC);
        assert_eq!(received.activity, activity);
    }

    #[test]
    fn publishing_without_subscribers_is_fine() {
        let fanout = BroadcastFanout::default();
        assert_eq!(fanout.subscriber_count(), 0);
        fanout.publish(ACTIVITY_TOPIC, ActivityEvent::new(json!({})));
    }

    #[test]
    fn each_activity_gets_its_own_id() {
        let a = ActivityEvent::new(json!({}));
        let b = ActivityEvent::new(json!({}));
        assert_ne!(a.internal_id, b.internal_id);
    }

    #[test]
    fn activity_serializes_with_internal_id() {
        let activity = ActivityEvent::new(json!({ "k": "v" }));
        let value = serde_json::to_value(&activity).unwrap();
        assert_eq!(value["event"], json!({ "k": "v" }));
        assert_eq!(
            value["internal_id"],
            json!(activity.internal_id.0.to_string())
        );
    }
}
