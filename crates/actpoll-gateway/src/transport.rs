//! Transport seam: the outbound fetch descriptor, the raw response, and the
//! trait a transport collaborator implements. Mock-injectable for tests.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ─── Request / Response ──────────────────────────────────────────────

/// One outbound HTTP request, fully resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchRequest {
    pub method: String,
    pub path: String,
    /// Query fields. Only fields with a value are present.
    pub query: BTreeMap<String, String>,
}

impl FetchRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: "GET".to_owned(),
            path: path.into(),
            query: BTreeMap::new(),
        }
    }

    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(String::as_str)
    }
}

/// Raw response handed back by the transport: status and JSON body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportResponse {
    pub status: u16,
    #[serde(default)]
    pub body: serde_json::Value,
}

impl TransportResponse {
    pub fn ok(body: serde_json::Value) -> Self {
        Self { status: 200, body }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

// ─── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("request timed out")]
    Timeout,

    #[error("transport closed")]
    Closed,

    #[error("transport io error: {0}")]
    Io(#[from] std::io::Error),
}

// ─── Trait ───────────────────────────────────────────────────────────

/// Performs fetches on behalf of the adapter.
pub trait Transport: Send + Sync {
    fn fetch(
        &self,
        request: FetchRequest,
    ) -> impl Future<Output = Result<TransportResponse, TransportError>> + Send;
}

impl<T: Transport> Transport for Arc<T> {
    fn fetch(
        &self,
        request: FetchRequest,
    ) -> impl Future<Output = Result<TransportResponse, TransportError>> + Send {
        (**self).fetch(request)
    }
}
