//! actpoll-gateway: request/response adapter between poll intents and the
//! transport collaborator, plus the event store the adapter feeds.
//!
//! The transport itself (HTTP client, auth, retries at the socket level) is
//! not implemented here; callers plug one in through [`transport::Transport`].

pub mod adapter;
pub mod store;
pub mod transport;

pub use actpoll_core::types;
