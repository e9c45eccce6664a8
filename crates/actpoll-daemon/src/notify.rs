//! Outbound notifications: log updates, user-facing error notices, and
//! telemetry events.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use actpoll_core::types::{EntityId, Event, QueryParams};

/// Telemetry event name emitted when a poll fails and polling stops.
pub const POLLING_FAIL_EVENT: &str = "polling_fail";

/// Text of the error notice shown for a failed activity fetch.
pub const ACTIVITY_ERROR_MESSAGE: &str = "Error receiving activity for site.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackEvent {
    pub name: String,
    pub entity_id: EntityId,
}

impl TrackEvent {
    pub fn polling_fail(entity_id: EntityId) -> Self {
        Self {
            name: POLLING_FAIL_EVENT.to_owned(),
            entity_id,
        }
    }
}

/// Notification pushed to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Notification {
    ActivityLogUpdated {
        entity_id: EntityId,
        items: Vec<Event>,
        total_items: u64,
        oldest_item_ts: Option<i64>,
        /// Query of the poll that produced this page.
        query: QueryParams,
    },
    ErrorNotice {
        entity_id: EntityId,
        message: String,
    },
    Track(TrackEvent),
}

impl Notification {
    pub fn entity_id(&self) -> EntityId {
        match self {
            Self::ActivityLogUpdated { entity_id, .. } | Self::ErrorNotice { entity_id, .. } => {
                *entity_id
            }
            Self::Track(event) => event.entity_id,
        }
    }
}

/// Broadcast fan-out for notifications. Sending with no subscriber is fine.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: broadcast::Sender<Notification>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    pub fn emit(&self, notification: Notification) {
        if self.tx.send(notification).is_err() {
            tracing::trace!("notification dropped: no subscribers");
        }
    }
}
