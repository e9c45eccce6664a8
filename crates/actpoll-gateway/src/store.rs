//! Event store collaborator: where successful polls deposit their items and
//! where the cursor fallback reads the newest known event time of an entity.

use std::collections::{HashMap, VecDeque};

use actpoll_core::cursor::newest_event_ts;
use actpoll_core::types::{EntityId, Event};

/// Events kept per entity by [`MemoryEventStore`] unless configured otherwise.
pub const DEFAULT_EVENT_RETENTION: usize = 1_000;

/// Storage for activity-log entries, keyed by entity.
pub trait EventStore: Send {
    fn append(&mut self, entity_id: EntityId, items: &[Event]);

    /// Events currently held for the entity, oldest arrival first.
    fn events(&self, entity_id: EntityId) -> Vec<Event>;

    /// Newest timestamp ever appended for the entity.
    fn newest_timestamp(&self, entity_id: EntityId) -> Option<i64> {
        newest_event_ts(&self.events(entity_id))
    }
}

#[derive(Debug, Default)]
struct EntityLog {
    events: VecDeque<Event>,
    /// High-water mark; survives eviction of the event that set it.
    newest: Option<i64>,
}

/// In-process store holding at most `retention` events per entity.
///
/// Oldest arrivals are evicted first. The newest timestamp is tracked
/// separately, so eviction never moves the cursor fallback backwards.
#[derive(Debug)]
pub struct MemoryEventStore {
    logs: HashMap<EntityId, EntityLog>,
    retention: usize,
}

impl Default for MemoryEventStore {
    fn default() -> Self {
        Self::with_retention(DEFAULT_EVENT_RETENTION)
    }
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A `retention` of zero keeps no events, only the high-water mark.
    pub fn with_retention(retention: usize) -> Self {
        Self {
            logs: HashMap::new(),
            retention,
        }
    }

    pub fn retention(&self) -> usize {
        self.retention
    }

    pub fn len(&self, entity_id: EntityId) -> usize {
        self.logs.get(&entity_id).map_or(0, |log| log.events.len())
    }

    /// Entities with at least one appended event, ascending.
    pub fn entities(&self) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self.logs.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Forget everything stored for `entity_id`. Returns the count dropped.
    pub fn clear(&mut self, entity_id: EntityId) -> usize {
        self.logs.remove(&entity_id).map_or(0, |log| log.events.len())
    }
}

impl EventStore for MemoryEventStore {
    fn append(&mut self, entity_id: EntityId, items: &[Event]) {
        if items.is_empty() {
            return;
        }
        let log = self.logs.entry(entity_id).or_default();
        log.newest = log.newest.max(newest_event_ts(items));
        log.events.extend(items.iter().cloned());
        let excess = log.events.len().saturating_sub(self.retention);
        if excess > 0 {
            log.events.drain(..excess);
            tracing::trace!(%entity_id, evicted = excess, "event retention reached");
        }
    }

    fn events(&self, entity_id: EntityId) -> Vec<Event> {
        self.logs
            .get(&entity_id)
            .map(|log| log.events.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn newest_timestamp(&self, entity_id: EntityId) -> Option<i64> {
        self.logs.get(&entity_id).and_then(|log| log.newest)
    }
}
