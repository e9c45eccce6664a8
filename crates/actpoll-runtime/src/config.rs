//! Config resolution: built-in defaults, then the TOML file, then CLI flags.
//!
//! ```toml
//! log_level = "debug"
//!
//! [poller]
//! poll_interval_ms = 8000
//! page_limit = 100
//! ```

use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use actpoll_daemon::config::PollerConfig;

use crate::cli::RunOpts;

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub log_level: Option<String>,
    pub poller: PollerConfig,
}

impl FileConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Load `path` if given, else fall back to defaults.
    pub fn load_or_default(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}

/// Apply `run` flag overrides on top of the file config and validate.
pub fn resolve_poller(file: &FileConfig, opts: &RunOpts) -> anyhow::Result<PollerConfig> {
    let mut poller = file.poller.clone();
    if let Some(ms) = opts.poll_interval_ms {
        poller.poll_interval_ms = ms;
    }
    if let Some(limit) = opts.page_limit {
        poller.page_limit = limit;
    }
    if let Some(prefix) = &opts.path_prefix {
        poller.path_prefix = prefix.clone();
    }
    poller.validate()?;
    Ok(poller)
}
