use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ─── Defaults ─────────────────────────────────────────────────────

/// Fixed delay between a completed poll and the next one.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 8_000;

/// Page size requested on every poll (`number` query field).
pub const DEFAULT_PAGE_LIMIT: u32 = 100;

// ─── Entity ───────────────────────────────────────────────────────

/// Opaque identifier of a watched site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub u64);

impl EntityId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for EntityId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EntityId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u64>()
            .map(Self)
            .map_err(|_| CoreError::InvalidEntityId(s.to_owned()))
    }
}

// ─── Cursor ───────────────────────────────────────────────────────

/// Server-issued resumption token (`nextAfter`).
///
/// The value is whatever JSON the server handed out (usually the sort tuple
/// of the last returned document). It is kept verbatim and sent back
/// JSON-encoded in `search_after`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(pub serde_json::Value);

impl Cursor {
    pub fn new(value: impl Into<serde_json::Value>) -> Self {
        Self(value.into())
    }

    /// A cursor that carries no position: `null`, `false`, or `""`.
    pub fn is_blank(&self) -> bool {
        match &self.0 {
            serde_json::Value::Null => true,
            serde_json::Value::Bool(b) => !b,
            serde_json::Value::String(s) => s.is_empty(),
            _ => false,
        }
    }

    /// Compact JSON encoding used for the `search_after` query field.
    pub fn to_query_value(&self) -> String {
        self.0.to_string()
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }
}

// ─── Event ────────────────────────────────────────────────────────

/// One activity-log entry. Only the timestamp is interpreted; everything
/// else the server sends is kept in `payload`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Epoch milliseconds. `None` when the entry carries no usable number.
    #[serde(
        rename = "activityTs",
        default,
        deserialize_with = "lenient_millis",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<i64>,
    #[serde(flatten)]
    pub payload: serde_json::Map<String, serde_json::Value>,
}

impl Event {
    pub fn at(timestamp: i64) -> Self {
        Self {
            timestamp: Some(timestamp),
            payload: serde_json::Map::new(),
        }
    }
}

/// Epoch milliseconds from an integer, a float, or a numeric string.
/// Anything else decodes to `None` instead of failing the whole page.
fn lenient_millis<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(millis_from_value))
}

fn millis_from_value(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && f.abs() < i64::MAX as f64)
                .map(|f| f.trunc() as i64)
        }),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

// ─── Query ────────────────────────────────────────────────────────

/// Query of a single poll: continue from a cursor, or from a timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueryParams {
    Cursor { search_after: Cursor, number: u32 },
    Since { date_start: i64, number: u32 },
}

impl QueryParams {
    pub fn cursor(&self) -> Option<&Cursor> {
        match self {
            Self::Cursor { search_after, .. } => Some(search_after),
            Self::Since { .. } => None,
        }
    }

    pub fn since(&self) -> Option<i64> {
        match self {
            Self::Since { date_start, .. } => Some(*date_start),
            Self::Cursor { .. } => None,
        }
    }

    pub fn limit(&self) -> u32 {
        match self {
            Self::Cursor { number, .. } | Self::Since { number, .. } => *number,
        }
    }
}

/// Full filter set accepted by the activity endpoint. Every field is
/// optional and unset fields are never sent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivityQuery {
    pub action: Option<String>,
    pub date_start: Option<i64>,
    pub date_end: Option<i64>,
    pub group: Option<String>,
    pub name: Option<String>,
    pub number: Option<u32>,
    pub search_after: Option<Cursor>,
}

impl From<&QueryParams> for ActivityQuery {
    fn from(params: &QueryParams) -> Self {
        match params {
            QueryParams::Cursor {
                search_after,
                number,
            } => Self {
                search_after: Some(search_after.clone()),
                number: Some(*number),
                ..Self::default()
            },
            QueryParams::Since { date_start, number } => Self {
                date_start: Some(*date_start),
                number: Some(*number),
                ..Self::default()
            },
        }
    }
}

/// Description of one outbound poll. Built per fetch, never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct PollIntent {
    pub entity_id: EntityId,
    pub query: QueryParams,
}

// ─── Poll Result ──────────────────────────────────────────────────

/// Decoded body of a successful activity response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityPage {
    #[serde(default)]
    pub items: Vec<Event>,
    #[serde(default)]
    pub total_items: u64,
    #[serde(default, deserialize_with = "lenient_millis")]
    pub oldest_item_ts: Option<i64>,
    #[serde(default, rename = "nextAfter", skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<Cursor>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollResult {
    Success(ActivityPage),
    Failure { reason: String },
}

impl PollResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn next_cursor(&self) -> Option<&Cursor> {
        match self {
            Self::Success(page) => page.next_cursor.as_ref(),
            Self::Failure { .. } => None,
        }
    }

    pub fn items(&self) -> &[Event] {
        match self {
            Self::Success(page) => &page.items,
            Self::Failure { .. } => &[],
        }
    }
}

// ─── Error ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    #[error("invalid entity id: {0:?}")]
    InvalidEntityId(String),
}

// ─── Tests ────────────────────────────────────────────────────────
