//! Cursor resolution: decides the query of the next poll from the stored
//! cursor, the latest poll result, and the events already known locally.
//!
//! Cursor continuation is preferred. The timestamp fallback only kicks in
//! when neither the response nor the entry carries a cursor, and it never
//! goes behind the newest locally known event.

use crate::types::{Cursor, DEFAULT_PAGE_LIMIT, Event, PollResult, QueryParams};

// ─── Resolution ──────────────────────────────────────────────────────

/// Outcome of resolving the next poll.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Poll again with this query.
    Continue(QueryParams),
    /// The last poll failed; polling for the entity ends.
    Stop,
}

// ─── Pure helpers ────────────────────────────────────────────────────

/// Newest timestamp across `events`. Input order is irrelevant; events
/// without a timestamp are skipped.
pub fn newest_event_ts(events: &[Event]) -> Option<i64> {
    events.iter().filter_map(|e| e.timestamp).max()
}

/// The cursor to keep on the entry after `result`: the fresh one when the
/// server sent one, otherwise whatever was stored before.
pub fn carry_cursor(stored: Option<&Cursor>, result: &PollResult) -> Option<Cursor> {
    result
        .next_cursor()
        .filter(|c| !c.is_blank())
        .or(stored)
        .cloned()
}

// ─── Resolver ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CursorResolver {
    page_limit: u32,
}

impl CursorResolver {
    pub fn new(page_limit: u32) -> Self {
        Self { page_limit }
    }

    pub fn page_limit(&self) -> u32 {
        self.page_limit
    }

    /// Query of the first poll after `watch`: everything from now on.
    pub fn initial_query(&self, now_ms: i64) -> QueryParams {
        QueryParams::Since {
            date_start: now_ms,
            number: self.page_limit,
        }
    }

    /// Timestamp fallback: newest known event time, or `now_ms` when none
    /// is known.
    pub fn fallback_query(&self, newest_known: Option<i64>, now_ms: i64) -> QueryParams {
        QueryParams::Since {
            date_start: newest_known.unwrap_or(now_ms),
            number: self.page_limit,
        }
    }

    /// Compute the next query.
    ///
    /// 1. success with a cursor: continue from it;
    /// 2. success without one: reuse the stored cursor;
    /// 3. no cursor anywhere: fall back to the newest known timestamp;
    /// 4. failure: stop.
    pub fn resolve(
        &self,
        stored: Option<&Cursor>,
        result: &PollResult,
        newest_known: Option<i64>,
        now_ms: i64,
    ) -> Resolution {
        if !result.is_success() {
            return Resolution::Stop;
        }
        match carry_cursor(stored, result) {
            Some(search_after) => Resolution::Continue(QueryParams::Cursor {
                search_after,
                number: self.page_limit,
            }),
            None => Resolution::Continue(self.fallback_query(newest_known, now_ms)),
        }
    }
}

impl Default for CursorResolver {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_LIMIT)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────
