//! Activity adapter: turns poll intents into fetch requests and normalizes
//! whatever the transport returns into a [`PollResult`].
//!
//! Request shape: `GET {prefix}/{entity_id}/activity` with any of
//! `action`, `date_start`, `date_end`, `group`, `name`, `number`,
//! `search_after`. `search_after` carries the cursor JSON-encoded.
//! Unset fields are left out of the query entirely.

use std::collections::BTreeMap;

use serde::Deserialize;

use actpoll_core::types::{ActivityPage, ActivityQuery, EntityId, Event, PollIntent, PollResult};

use crate::store::EventStore;
use crate::transport::{FetchRequest, Transport, TransportError, TransportResponse};

// ─── Constants ───────────────────────────────────────────────────────

/// Default path prefix in front of `/{entity_id}/activity`.
pub const DEFAULT_PATH_PREFIX: &str = "/entities";

// ─── Adapter ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityAdapter {
    path_prefix: String,
}

impl ActivityAdapter {
    pub fn new(path_prefix: impl Into<String>) -> Self {
        let prefix: String = path_prefix.into();
        Self {
            path_prefix: prefix.trim_end_matches('/').to_owned(),
        }
    }

    pub fn activity_path(&self, entity_id: EntityId) -> String {
        format!("{}/{entity_id}/activity", self.path_prefix)
    }

    /// Outbound request for one poll.
    pub fn build_request(&self, intent: &PollIntent) -> FetchRequest {
        self.build_query_request(intent.entity_id, &ActivityQuery::from(&intent.query))
    }

    /// Outbound request for an arbitrary activity query.
    pub fn build_query_request(&self, entity_id: EntityId, query: &ActivityQuery) -> FetchRequest {
        let mut request = FetchRequest::get(self.activity_path(entity_id));
        request.query = encode_query(query);
        request
    }

    /// Issue the fetch through `transport` and normalize the outcome.
    pub async fn issue_fetch<T: Transport>(&self, transport: &T, intent: &PollIntent) -> PollResult {
        let request = self.build_request(intent);
        tracing::debug!(
            entity_id = %intent.entity_id,
            path = %request.path,
            query = ?request.query,
            "issuing activity fetch"
        );
        normalize(transport.fetch(request).await)
    }
}

impl Default for ActivityAdapter {
    fn default() -> Self {
        Self::new(DEFAULT_PATH_PREFIX)
    }
}

// ─── Query encoding ──────────────────────────────────────────────────

fn encode_query(query: &ActivityQuery) -> BTreeMap<String, String> {
    let fields = [
        ("action", query.action.clone()),
        ("date_end", query.date_end.map(|v| v.to_string())),
        ("date_start", query.date_start.map(|v| v.to_string())),
        ("group", query.group.clone()),
        ("name", query.name.clone()),
        ("number", query.number.map(|v| v.to_string())),
        (
            "search_after",
            query.search_after.as_ref().map(|c| c.to_query_value()),
        ),
    ];
    fields
        .into_iter()
        .filter_map(|(key, value)| value.map(|v| (key.to_owned(), v)))
        .collect()
}

// ─── Response normalization ──────────────────────────────────────────

/// Map a transport outcome to a [`PollResult`].
///
/// Transport errors, non-2xx statuses and undecodable bodies all become
/// `Failure`. Within a decodable page, items that are not activity objects
/// are dropped rather than failing the page. A blank `nextAfter` is treated
/// as absent.
pub fn normalize(outcome: Result<TransportResponse, TransportError>) -> PollResult {
    let mut response = match outcome {
        Ok(response) => response,
        Err(e) => {
            return PollResult::Failure {
                reason: e.to_string(),
            };
        }
    };

    if !response.is_success() {
        let detail = response
            .body
            .get("message")
            .and_then(|m| m.as_str())
            .map(|m| format!(": {m}"))
            .unwrap_or_default();
        return PollResult::Failure {
            reason: format!("status {}{detail}", response.status),
        };
    }

    let dropped = drop_malformed_items(&mut response.body);
    if dropped > 0 {
        tracing::warn!(dropped, "skipping malformed activity items");
    }

    match serde_json::from_value::<ActivityPage>(response.body) {
        Ok(mut page) => {
            if page.next_cursor.as_ref().is_some_and(|c| c.is_blank()) {
                page.next_cursor = None;
            }
            PollResult::Success(page)
        }
        Err(e) => PollResult::Failure {
            reason: format!("invalid activity payload: {e}"),
        },
    }
}

/// Remove entries of `items` that do not decode as an [`Event`].
/// Returns how many were removed.
fn drop_malformed_items(body: &mut serde_json::Value) -> usize {
    let Some(items) = body
        .get_mut("items")
        .and_then(serde_json::Value::as_array_mut)
    else {
        return 0;
    };
    let before = items.len();
    items.retain(|item| Event::deserialize(item).is_ok());
    before - items.len()
}

/// Deposit the items of a successful poll into the store.
///
/// Must run before the cursor fallback is computed so the fallback sees
/// them. Returns the number of items appended.
pub fn record_success<S: EventStore + ?Sized>(
    store: &mut S,
    entity_id: EntityId,
    result: &PollResult,
) -> usize {
    let items = result.items();
    store.append(entity_id, items);
    items.len()
}

// ─── Tests ───────────────────────────────────────────────────────────
