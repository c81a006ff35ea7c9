use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::broadcast;

/// Per-topic buffer; a subscriber that lags this far behind is dropped and
/// recovers by polling HTTP.
const CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum ExpiryReason {
    TokenExpired,
    InvalidToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum CompletionReason {
    Submitted,
    Timeout,
    SessionCompleted,
}

/// Events published on the token-keyed bus and forwarded verbatim to
/// WebSocket clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum SessionEvent {
    SessionExpired {
        message: String,
        reason: ExpiryReason,
    },
    SessionCompleted {
        message: String,
        reason: CompletionReason,
        #[serde(skip_serializing_if = "Option::is_none")]
        grade_history_id: Option<String>,
    },
}

/// Token-keyed pub/sub. Publish is fire-and-forget with no replay: a
/// subscriber that joins after an event has missed it.
#[derive(Clone)]
pub(crate) struct EventBus {
    topics: Arc<Mutex<HashMap<String, broadcast::Sender<SessionEvent>>>>,
}

impl EventBus {
    pub(crate) fn new() -> Self {
        Self { topics: Arc::new(Mutex::new(HashMap::new())) }
    }

    pub(crate) fn subscribe(&self, token: &str) -> broadcast::Receiver<SessionEvent> {
        let mut topics = self.topics.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        topics
            .entry(token.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    pub(crate) fn publish(&self, token: &str, event: SessionEvent) {
        let mut topics = self.topics.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(sender) = topics.get(token) {
            if sender.send(event).is_err() || sender.receiver_count() == 0 {
                topics.remove(token);
            }
        }
    }

    /// Drops the topic once its last subscriber disconnects.
    pub(crate) fn prune(&self, token: &str) {
        let mut topics = self.topics.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(sender) = topics.get(token) {
            if sender.receiver_count() == 0 {
                topics.remove(token);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn topic_count(&self) -> usize {
        self.topics.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe("tok-1");

        bus.publish(
            "tok-1",
            SessionEvent::SessionExpired {
                message: "rotated".to_string(),
                reason: ExpiryReason::TokenExpired,
            },
        );

        let event = rx.recv().await.expect("event");
        match event {
            SessionEvent::SessionExpired { reason, .. } => {
                assert_eq!(reason, ExpiryReason::TokenExpired)
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn no_replay_for_late_subscribers() {
        let bus = EventBus::new();
        let _early = bus.subscribe("tok-2");

        bus.publish(
            "tok-2",
            SessionEvent::SessionCompleted {
                message: "done".to_string(),
                reason: CompletionReason::Submitted,
                grade_history_id: None,
            },
        );

        let mut late = bus.subscribe("tok-2");
        assert!(matches!(late.try_recv(), Err(broadcast::error::TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_a_noop_and_prunes() {
        let bus = EventBus::new();
        {
            let _rx = bus.subscribe("tok-3");
        }
        bus.publish(
            "tok-3",
            SessionEvent::SessionExpired {
                message: "gone".to_string(),
                reason: ExpiryReason::InvalidToken,
            },
        );
        assert_eq!(bus.topic_count(), 0);

        // unknown topic: nothing to deliver, nothing to create
        bus.publish(
            "tok-unknown",
            SessionEvent::SessionExpired {
                message: "gone".to_string(),
                reason: ExpiryReason::InvalidToken,
            },
        );
        assert_eq!(bus.topic_count(), 0);
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let event = SessionEvent::SessionCompleted {
            message: "Exam submitted successfully. Grading in progress.".to_string(),
            reason: CompletionReason::Submitted,
            grade_history_id: None,
        };
        let json = serde_json::to_value(&event).expect("json");
        assert_eq!(json["type"], "session_completed");
        assert_eq!(json["reason"], "submitted");
        assert!(json.get("grade_history_id").is_none());

        let event = SessionEvent::SessionExpired {
            message: "A new session token has been issued.".to_string(),
            reason: ExpiryReason::TokenExpired,
        };
        let json = serde_json::to_value(&event).expect("json");
        assert_eq!(json["type"], "session_expired");
        assert_eq!(json["reason"], "token_expired");
    }
}
