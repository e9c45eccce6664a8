//! actpoll-daemon: the polling control loop.
//! Owns the watch registry, arms re-poll timers, issues fetches through the
//! gateway adapter, and pushes notifications to subscribers.

pub mod config;
pub mod notify;
pub mod orchestrator;
pub mod scheduler;

pub use actpoll_core::types;
