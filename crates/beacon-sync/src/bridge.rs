//! # Event Bridge
//!
//! Bounded channel for events produced outside the host's own `track` calls
//! (another SDK, a plugin, the agent's stdin). The receiving half is handed
//! to [`TelemetryService`](crate::service::TelemetryService) at construction.

use tokio::sync::mpsc;
use tracing::{error, warn};

use beacon_core::{Event, EventDraft};

use crate::error::{TelemetryError, TelemetryResult};

/// Creates a bridge with room for `capacity` undelivered drafts.
pub fn event_bridge(capacity: usize) -> (BridgeSender, mpsc::Receiver<EventDraft>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (BridgeSender { tx }, rx)
}

/// Producer side of the bridge. Cheap to clone.
#[derive(Debug, Clone)]
pub struct BridgeSender {
    tx: mpsc::Sender<EventDraft>,
}

impl BridgeSender {
    /// Submits a draft without waiting. A full or closed bridge drops it.
    pub fn submit(&self, draft: EventDraft) -> bool {
        match self.tx.try_send(draft) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(draft)) => {
                warn!(name = ?draft.name, "Event bridge full, dropping event");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("Event bridge closed, dropping event");
                false
            }
        }
    }

    /// Submits a draft, waiting for room.
    pub async fn send(&self, draft: EventDraft) -> TelemetryResult<()> {
        self.tx
            .send(draft)
            .await
            .map_err(|_| TelemetryError::ChannelError("Event bridge closed".into()))
    }

    /// Parses one JSON object (`{"name", "timestamp"?, "parameters"?}`) and
    /// submits it.
    pub async fn send_json(&self, line: &str) -> TelemetryResult<()> {
        let draft: EventDraft = serde_json::from_str(line)?;
        self.send(draft).await
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Validates a bridged draft. Invalid drafts are logged and dropped.
pub(crate) fn admit(draft: EventDraft, now: i64) -> Option<Event> {
    match draft.into_event(now) {
        Ok(event) => Some(event),
        Err(e) => {
            error!(error = %e, "Rejected bridged event");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::ParamValue;

    #[tokio::test]
    async fn test_submit_until_full() {
        let (sender, mut rx) = event_bridge(2);

        assert!(sender.submit(EventDraft::named("a")));
        assert!(sender.submit(EventDraft::named("b")));
        assert!(!sender.submit(EventDraft::named("c")));

        assert_eq!(rx.recv().await.unwrap().name.as_deref(), Some("a"));
        assert!(sender.submit(EventDraft::named("d")));
    }

    #[tokio::test]
    async fn test_closed_bridge() {
        let (sender, rx) = event_bridge(4);
        drop(rx);

        assert!(sender.is_closed());
        assert!(!sender.submit(EventDraft::named("a")));
        assert!(matches!(
            sender.send(EventDraft::named("a")).await,
            Err(TelemetryError::ChannelError(_))
        ));
    }

    #[tokio::test]
    async fn test_send_json() {
        let (sender, mut rx) = event_bridge(4);

        sender
            .send_json(r#"{"name":"purchase","parameters":{"sku":"gems_100","price":1.99}}"#)
            .await
            .unwrap();
        assert!(sender.send_json("not json").await.is_err());

        let event = admit(rx.recv().await.unwrap(), 5_000).unwrap();
        assert_eq!(event.name, "purchase");
        assert_eq!(event.timestamp, 5_000);
        assert_eq!(event.parameters["price"], ParamValue::Float(1.99));
    }

    #[test]
    fn test_admit_rejects_nameless() {
        assert!(admit(EventDraft::default(), 1).is_none());
        assert!(admit(
            EventDraft {
                timestamp: Some(-5),
                ..EventDraft::named("x")
            },
            1
        )
        .is_none());
    }
}
