//! `actpoll query`: print the request one activity query would send.

use anyhow::Context;
use chrono::Utc;

use actpoll_core::types::{ActivityQuery, Cursor, EntityId, QueryParams};
use actpoll_daemon::config::PollerConfig;
use actpoll_gateway::adapter::ActivityAdapter;
use actpoll_gateway::transport::FetchRequest;

use crate::cli::QueryOpts;

pub(crate) fn build_request(
    opts: &QueryOpts,
    config: &PollerConfig,
    now_ms: i64,
) -> anyhow::Result<FetchRequest> {
    let number = opts.page_limit.unwrap_or(config.page_limit);
    let params = match &opts.cursor {
        Some(raw) => {
            let value: serde_json::Value =
                serde_json::from_str(raw).with_context(|| format!("cursor is not JSON: {raw}"))?;
            let cursor = Cursor::new(value);
            if cursor.is_blank() {
                anyhow::bail!("cursor must not be blank");
            }
            QueryParams::Cursor {
                search_after: cursor,
                number,
            }
        }
        None => QueryParams::Since {
            date_start: opts.since.unwrap_or(now_ms),
            number,
        },
    };

    let query = ActivityQuery {
        action: opts.action.clone(),
        date_end: opts.date_end,
        group: opts.group.clone(),
        name: opts.name.clone(),
        ..ActivityQuery::from(&params)
    };
    let adapter = ActivityAdapter::new(config.path_prefix.clone());
    Ok(adapter.build_query_request(EntityId(opts.entity), &query))
}

pub fn cmd_query(opts: &QueryOpts, config: &PollerConfig) -> anyhow::Result<()> {
    let request = build_request(opts, config, Utc::now().timestamp_millis())?;
    let json = serde_json::to_string_pretty(&request)?;
    println!("{json}");
    Ok(())
}
