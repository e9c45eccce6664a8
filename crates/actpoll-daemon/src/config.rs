//! Poller configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use actpoll_core::types::{DEFAULT_PAGE_LIMIT, DEFAULT_POLL_INTERVAL_MS};
use actpoll_gateway::adapter::DEFAULT_PATH_PREFIX;
use actpoll_gateway::store::DEFAULT_EVENT_RETENTION;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("poll_interval_ms must be greater than zero")]
    ZeroInterval,

    #[error("page_limit must be greater than zero")]
    ZeroPageLimit,

    #[error("{0} must be greater than zero")]
    ZeroCapacity(&'static str),

    #[error("path_prefix must start with '/': {0:?}")]
    InvalidPathPrefix(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PollerConfig {
    /// Delay between a completed poll and the next one.
    pub poll_interval_ms: u64,
    /// `number` sent with every poll.
    pub page_limit: u32,
    /// Buffered notifications per subscriber before it starts lagging.
    pub notification_capacity: usize,
    /// Buffered commands before `watch`/`unwatch` callers wait.
    pub command_capacity: usize,
    /// Prefix in front of `/{entity_id}/activity`.
    pub path_prefix: String,
    /// Events kept per entity by the in-memory store. Zero keeps only the
    /// newest timestamp.
    pub event_retention: usize,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            page_limit: DEFAULT_PAGE_LIMIT,
            notification_capacity: 256,
            command_capacity: 64,
            path_prefix: DEFAULT_PATH_PREFIX.to_owned(),
            event_retention: DEFAULT_EVENT_RETENTION,
        }
    }
}

impl PollerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::ZeroInterval);
        }
        if self.page_limit == 0 {
            return Err(ConfigError::ZeroPageLimit);
        }
        if self.notification_capacity == 0 {
            return Err(ConfigError::ZeroCapacity("notification_capacity"));
        }
        if self.command_capacity == 0 {
            return Err(ConfigError::ZeroCapacity("command_capacity"));
        }
        if !self.path_prefix.starts_with('/') {
            return Err(ConfigError::InvalidPathPrefix(self.path_prefix.clone()));
        }
        Ok(())
    }
}
