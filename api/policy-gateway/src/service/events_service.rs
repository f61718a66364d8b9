//! Decision/result fan-out to live subscribers.
//!
//! One bounded broadcast channel feeds every WebSocket subscriber; session
//! filtering happens at the subscriber edge. The channel is documented
//! lossy: a subscriber that cannot keep up loses its oldest events, and the
//! audit log remains the source of truth for reconciliation. Events are
//! also mirrored to a Redis channel when infra is configured so external
//! dashboards can listen without holding a WebSocket.

use redis::AsyncCommands;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::warn;

use crate::infra::{InfraClients, EVENTS_CHANNEL};
use crate::service::metrics_service;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Decision,
    Result,
}

#[derive(Debug, Clone, Serialize)]
pub struct EntryEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(skip)]
    pub session_id: String,
    pub entry: Value,
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EntryEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EntryEvent> {
        self.tx.subscribe()
    }

    /// Publish never blocks and never fails the caller; with no subscriber
    /// connected the event is simply dropped.
    pub fn publish(&self, event: EntryEvent) {
        metrics_service::inc_events_published();
        let _ = self.tx.send(event);
    }
}

/// Newline-terminated wire rendering of one push-channel message.
pub fn wire_message(event: &EntryEvent) -> Result<String, String> {
    let body = serde_json::to_string(event).map_err(|e| format!("event encode failed: {e}"))?;
    Ok(format!("{body}\n"))
}

pub async fn mirror_to_redis(infra: &InfraClients, event: &EntryEvent) {
    let payload = match serde_json::to_string(event) {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "event mirror encode failed");
            return;
        }
    };
    let mut conn = match infra.redis.get_multiplexed_async_connection().await {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "redis connect failed; event mirror skipped");
            return;
        }
    };
    let published: Result<usize, _> = conn.publish(EVENTS_CHANNEL, payload).await;
    if let Err(e) = published {
        warn!(error = %e, "event mirror publish failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        bus.publish(EntryEvent {
            kind: EventKind::Decision,
            session_id: "s1".to_string(),
            entry: json!({"log_id": "l1"}),
        });
        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::Decision);
        assert_eq!(event.session_id, "s1");
    }

    #[tokio::test]
    async fn slow_subscribers_lose_oldest_events() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();
        for i in 0..5 {
            bus.publish(EntryEvent {
                kind: EventKind::Decision,
                session_id: "s1".to_string(),
                entry: json!({"i": i}),
            });
        }
        match rx.recv().await {
            Err(broadcast::error::RecvError::Lagged(skipped)) => assert!(skipped >= 3),
            other => panic!("expected lag, got {other:?}"),
        }
        // After the lag the newest events are still deliverable.
        let event = rx.recv().await.unwrap();
        assert_eq!(event.entry["i"], json!(3));
    }

    #[test]
    fn wire_messages_are_newline_delimited_json() {
        let event = EntryEvent {
            kind: EventKind::Result,
            session_id: "s1".to_string(),
            entry: json!({"log_id": "l1"}),
        };
        let wire = wire_message(&event).unwrap();
        assert!(wire.ends_with('\n'));
        let parsed: Value = serde_json::from_str(wire.trim_end()).unwrap();
        assert_eq!(parsed["type"], json!("result"));
        assert_eq!(parsed["entry"]["log_id"], json!("l1"));
    }
}
