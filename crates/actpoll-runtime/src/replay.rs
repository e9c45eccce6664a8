//! Fixture-replay transport: serves scripted responses per entity.
//!
//! ```json
//! {
//!   "latency_ms": 20,
//!   "entities": {
//!     "42": [
//!       {"body": {"items": [{"activityTs": 1000}], "nextAfter": "X"}},
//!       {"status": 503, "body": {"message": "maintenance"}},
//!       {"error": "connection reset"}
//!     ]
//!   }
//! }
//! ```
//!
//! Steps are consumed in order. An entity with no steps left (or none at
//! all) gets an empty page without a cursor.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use actpoll_core::types::EntityId;
use actpoll_gateway::transport::{FetchRequest, Transport, TransportError, TransportResponse};

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum FixtureStep {
    Error {
        error: String,
    },
    Response {
        #[serde(default = "ok_status")]
        status: u16,
        #[serde(default)]
        body: serde_json::Value,
    },
}

fn ok_status() -> u16 {
    200
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FixtureFile {
    #[serde(default)]
    latency_ms: u64,
    #[serde(default)]
    entities: HashMap<String, Vec<FixtureStep>>,
}

#[derive(Debug)]
pub struct FixtureTransport {
    latency: Duration,
    scripts: Mutex<HashMap<EntityId, VecDeque<FixtureStep>>>,
}

impl FixtureTransport {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading fixture {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("parsing fixture {}", path.display()))
    }

    pub fn from_json(raw: &str) -> anyhow::Result<Self> {
        let file: FixtureFile = serde_json::from_str(raw)?;
        let mut scripts = HashMap::with_capacity(file.entities.len());
        for (key, steps) in file.entities {
            let entity_id: EntityId = key.parse()?;
            scripts.insert(entity_id, VecDeque::from(steps));
        }
        Ok(Self {
            latency: Duration::from_millis(file.latency_ms),
            scripts: Mutex::new(scripts),
        })
    }

    /// Steps not yet served for `entity_id`.
    pub fn remaining(&self, entity_id: EntityId) -> usize {
        let scripts = self.scripts.lock().unwrap_or_else(|e| e.into_inner());
        scripts.get(&entity_id).map_or(0, VecDeque::len)
    }

    fn next_step(&self, request: &FetchRequest) -> Result<Option<FixtureStep>, TransportError> {
        let entity_id = entity_from_path(&request.path).ok_or_else(|| {
            TransportError::Connection(format!("no fixture route for {}", request.path))
        })?;
        let mut scripts = self.scripts.lock().unwrap_or_else(|e| e.into_inner());
        Ok(scripts.get_mut(&entity_id).and_then(VecDeque::pop_front))
    }
}

impl Transport for FixtureTransport {
    async fn fetch(&self, request: FetchRequest) -> Result<TransportResponse, TransportError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        match self.next_step(&request)? {
            Some(FixtureStep::Error { error }) => Err(TransportError::Connection(error)),
            Some(FixtureStep::Response { status, body }) => Ok(TransportResponse { status, body }),
            None => {
                tracing::trace!(path = %request.path, "fixture exhausted, serving empty page");
                Ok(TransportResponse::ok(serde_json::json!({ "items": [] })))
            }
        }
    }
}

/// `/prefix/{id}/activity` -> `id`.
fn entity_from_path(path: &str) -> Option<EntityId> {
    let mut segments = path.trim_end_matches('/').rsplit('/');
    if segments.next()? != "activity" {
        return None;
    }
    segments.next()?.parse().ok()
}
