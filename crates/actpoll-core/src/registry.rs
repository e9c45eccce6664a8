//! Watch registry: the table of currently watched entities and their
//! per-entity polling state.
//!
//! The registry is an owned value (no global). Presence in the table is the
//! single source of truth for "still watching": timers and fetch completions
//! that arrive after an entry is gone, or that belong to an earlier watch
//! session of the same id, must be treated as no-ops by the caller.

use std::collections::HashMap;

use crate::types::{Cursor, EntityId};

// ─── Timer Handle ────────────────────────────────────────────────────

/// An armed one-shot timer owned by a registry entry.
///
/// `cancel` must be idempotent: cancelling an already fired or already
/// cancelled timer does nothing.
pub trait TimerHandle {
    fn cancel(&self);
}

impl TimerHandle for () {
    fn cancel(&self) {}
}

// ─── Entry ───────────────────────────────────────────────────────────

/// Polling state of one watched entity.
#[derive(Debug)]
pub struct WatchedEntity<H: TimerHandle = ()> {
    pub entity_id: EntityId,
    /// Last cursor handed out by the server for this entity.
    pub cursor: Option<Cursor>,
    /// Armed re-poll timer, if any.
    pub timer: Option<H>,
    /// True while a fetch is outstanding.
    pub pending: bool,
    /// Watch session number, unique per `start_watching` insertion.
    pub session: u64,
}

impl<H: TimerHandle> WatchedEntity<H> {
    fn new(entity_id: EntityId, session: u64) -> Self {
        Self {
            entity_id,
            cursor: None,
            timer: None,
            pending: false,
            session,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.timer.is_some()
    }

    /// Cancel and drop the armed timer. Returns `true` if one was armed.
    pub fn cancel_timer(&mut self) -> bool {
        match self.timer.take() {
            Some(timer) => {
                timer.cancel();
                true
            }
            None => false,
        }
    }
}

// ─── Registry ────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct WatchRegistry<H: TimerHandle = ()> {
    entries: HashMap<EntityId, WatchedEntity<H>>,
    next_session: u64,
}

impl<H: TimerHandle> WatchRegistry<H> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            next_session: 1,
        }
    }

    /// Insert a fresh entry (`cursor = None`, `pending = false`).
    ///
    /// Returns `false` and leaves the existing entry untouched when the
    /// entity is already watched.
    pub fn start_watching(&mut self, entity_id: EntityId) -> bool {
        if self.entries.contains_key(&entity_id) {
            return false;
        }
        let session = self.next_session;
        self.next_session = self.next_session.saturating_add(1);
        self.entries
            .insert(entity_id, WatchedEntity::new(entity_id, session));
        true
    }

    /// Remove the entry and cancel its armed timer. Absent ids are ignored.
    pub fn stop_watching(&mut self, entity_id: EntityId) -> Option<WatchedEntity<H>> {
        let mut entry = self.entries.remove(&entity_id)?;
        entry.cancel_timer();
        entry.pending = false;
        Some(entry)
    }

    pub fn is_watching(&self, entity_id: EntityId) -> bool {
        self.entries.contains_key(&entity_id)
    }

    /// True when the entity is watched *and* still in the given session.
    pub fn is_current(&self, entity_id: EntityId, session: u64) -> bool {
        self.entries
            .get(&entity_id)
            .is_some_and(|e| e.session == session)
    }

    pub fn get(&self, entity_id: EntityId) -> Option<&WatchedEntity<H>> {
        self.entries.get(&entity_id)
    }

    pub fn get_mut(&mut self, entity_id: EntityId) -> Option<&mut WatchedEntity<H>> {
        self.entries.get_mut(&entity_id)
    }

    /// Watched ids in ascending order.
    pub fn watched(&self) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self.entries.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Number of entities with a fetch outstanding.
    pub fn pending_count(&self) -> usize {
        self.entries.values().filter(|e| e.pending).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry, cancelling all armed timers. Returns the count removed.
    pub fn clear(&mut self) -> usize {
        let removed = self.entries.len();
        for (_, mut entry) in self.entries.drain() {
            entry.cancel_timer();
        }
        removed
    }
}

impl<H: TimerHandle> Default for WatchRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    /// Counts how many times `cancel` was called.
    #[derive(Debug, Clone, Default)]
    struct CountingTimer(Rc<Cell<u32>>);

    impl TimerHandle for CountingTimer {
        fn cancel(&self) {
            self.0.set(self.0.get() + 1);
        }
    }

    // ── 1. empty_registry ───────────────────────────────────────────

    #[test]
    fn empty_registry() {
        let reg: WatchRegistry = WatchRegistry::new();
        assert!(reg.is_empty());
        assert!(!reg.is_watching(EntityId(1)));
        assert!(reg.watched().is_empty());
    }

    // ── 2. start_watching_inserts_fresh_entry ───────────────────────

    #[test]
    fn start_watching_inserts_fresh_entry() {
        let mut reg: WatchRegistry = WatchRegistry::new();
        assert!(reg.start_watching(EntityId(42)));

        let entry = reg.get(EntityId(42)).expect("entry should exist");
        assert!(entry.cursor.is_none());
        assert!(!entry.pending);
        assert!(!entry.is_armed());
        assert!(reg.is_watching(EntityId(42)));
    }

    // ── 3. start_watching_is_idempotent ─────────────────────────────

    #[test]
    fn start_watching_is_idempotent() {
        let mut reg: WatchRegistry = WatchRegistry::new();
        reg.start_watching(EntityId(42));
        {
            let entry = reg.get_mut(EntityId(42)).expect("entry");
            entry.cursor = Some(Cursor::new("c1"));
            entry.pending = true;
        }
        let session = reg.get(EntityId(42)).expect("entry").session;

        assert!(!reg.start_watching(EntityId(42)));

        let entry = reg.get(EntityId(42)).expect("entry");
        assert_eq!(entry.cursor, Some(Cursor::new("c1")));
        assert!(entry.pending);
        assert_eq!(entry.session, session);
        assert_eq!(reg.len(), 1);
    }

    // ── 4. stop_watching_cancels_timer ──────────────────────────────

    #[test]
    fn stop_watching_cancels_timer() {
        let mut reg: WatchRegistry<CountingTimer> = WatchRegistry::new();
        let timer = CountingTimer::default();
        reg.start_watching(EntityId(7));
        reg.get_mut(EntityId(7)).expect("entry").timer = Some(timer.clone());

        let removed = reg.stop_watching(EntityId(7)).expect("was watched");
        assert!(removed.timer.is_none());
        assert!(!removed.pending);
        assert_eq!(timer.0.get(), 1);
        assert!(!reg.is_watching(EntityId(7)));
    }

    // ── 5. stop_watching_absent_is_noop ─────────────────────────────

    #[test]
    fn stop_watching_absent_is_noop() {
        let mut reg: WatchRegistry = WatchRegistry::new();
        assert!(reg.stop_watching(EntityId(99)).is_none());
        assert!(reg.is_empty());
    }

    // ── 6. rewatch_gets_new_session ─────────────────────────────────

    #[test]
    fn rewatch_gets_new_session() {
        let mut reg: WatchRegistry = WatchRegistry::new();
        reg.start_watching(EntityId(7));
        let first = reg.get(EntityId(7)).expect("entry").session;

        reg.stop_watching(EntityId(7));
        reg.start_watching(EntityId(7));
        let second = reg.get(EntityId(7)).expect("entry").session;

        assert_ne!(first, second);
        assert!(!reg.is_current(EntityId(7), first));
        assert!(reg.is_current(EntityId(7), second));
    }

    // ── 7. watched_is_sorted ────────────────────────────────────────

    #[test]
    fn watched_is_sorted() {
        let mut reg: WatchRegistry = WatchRegistry::new();
        for id in [30, 10, 20] {
            reg.start_watching(EntityId(id));
        }
        assert_eq!(reg.watched(), vec![EntityId(10), EntityId(20), EntityId(30)]);
    }

    // ── 8. clear_cancels_all_timers ─────────────────────────────────

    #[test]
    fn clear_cancels_all_timers() {
        let mut reg: WatchRegistry<CountingTimer> = WatchRegistry::new();
        let timer = CountingTimer::default();
        for id in [1, 2, 3] {
            reg.start_watching(EntityId(id));
            reg.get_mut(EntityId(id)).expect("entry").timer = Some(timer.clone());
        }

        assert_eq!(reg.clear(), 3);
        assert!(reg.is_empty());
        assert_eq!(timer.0.get(), 3);
    }

    // ── 9. cancel_timer_reports_whether_armed ───────────────────────

    #[test]
    fn cancel_timer_reports_whether_armed() {
        let mut reg: WatchRegistry<CountingTimer> = WatchRegistry::new();
        reg.start_watching(EntityId(5));
        let entry = reg.get_mut(EntityId(5)).expect("entry");

        assert!(!entry.cancel_timer());
        entry.timer = Some(CountingTimer::default());
        assert!(entry.cancel_timer());
        assert!(!entry.is_armed());
    }

    // ── 10. pending_count ───────────────────────────────────────────

    #[test]
    fn pending_count() {
        let mut reg: WatchRegistry = WatchRegistry::new();
        reg.start_watching(EntityId(1));
        reg.start_watching(EntityId(2));
        reg.get_mut(EntityId(2)).expect("entry").pending = true;
        assert_eq!(reg.pending_count(), 1);
    }
}
