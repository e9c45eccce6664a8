//! `actpoll run`: drives the orchestrator against a fixture transport.
//!
//! Stdin takes one command per line (`watch <id>`, `unwatch <id>`, `list`).
//! Every notification is printed to stdout as one JSON line. Stops on
//! ctrl-c or SIGTERM, and on stdin EOF unless startup watches were given
//! or `--ignore-eof` is set.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use actpoll_core::types::EntityId;
use actpoll_daemon::config::PollerConfig;
use actpoll_daemon::notify::Notification;
use actpoll_daemon::orchestrator::{Orchestrator, PollerHandle};
use actpoll_gateway::store::MemoryEventStore;

use crate::cli::RunOpts;
use crate::replay::FixtureTransport;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputCommand {
    Watch(EntityId),
    Unwatch(EntityId),
    List,
}

pub fn parse_command(line: &str) -> Result<InputCommand, String> {
    let mut words = line.split_whitespace();
    let verb = words.next().ok_or_else(|| "empty command".to_string())?;
    let arg = words.next();
    if words.next().is_some() {
        return Err(format!("too many arguments: {line:?}"));
    }
    let entity = |arg: Option<&str>| -> Result<EntityId, String> {
        arg.ok_or_else(|| format!("{verb} needs an entity id"))?
            .parse::<EntityId>()
            .map_err(|e| e.to_string())
    };
    match verb {
        "watch" => Ok(InputCommand::Watch(entity(arg)?)),
        "unwatch" => Ok(InputCommand::Unwatch(entity(arg)?)),
        "list" if arg.is_none() => Ok(InputCommand::List),
        "list" => Err("list takes no arguments".to_string()),
        other => Err(format!("unknown command: {other:?}")),
    }
}

/// Run until a shutdown signal, or stdin EOF when that ends the run.
pub async fn run(opts: RunOpts, config: PollerConfig) -> anyhow::Result<()> {
    let transport = FixtureTransport::load(&opts.fixture)?;
    let store = MemoryEventStore::with_retention(config.event_retention);
    let (orchestrator, handle) = Orchestrator::new(&config, transport, store);

    let cancel = CancellationToken::new();
    let printer = tokio::spawn(print_notifications(handle.subscribe(), cancel.clone()));
    let orchestrator_handle = tokio::spawn(orchestrator.with_cancel(cancel.clone()).run());

    for id in &opts.watch {
        handle.watch(EntityId(*id)).await?;
    }
    tracing::info!(
        watched = opts.watch.len(),
        poll_interval_ms = config.poll_interval_ms,
        page_limit = config.page_limit,
        "poller running"
    );

    let stdin = BufReader::new(tokio::io::stdin());
    let input = drive_input(stdin, handle.clone(), opts.stops_on_eof());

    // Wait for shutdown signal (ctrl-c or SIGTERM) or end of input
    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    let shutdown = async {
        #[cfg(unix)]
        {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => tracing::info!("received ctrl-c, shutting down"),
                _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
            }
        }

        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("received ctrl-c, shutting down");
        }
    };

    tokio::select! {
        () = shutdown => {}
        res = input => {
            res?;
            tracing::info!("input closed, shutting down");
        }
    }

    cancel.cancel();
    let store = orchestrator_handle.await?;
    printer.await?;
    for entity_id in store.entities() {
        tracing::debug!(%entity_id, events = store.len(entity_id), "stored events");
    }
    tracing::info!("poller stopped");
    Ok(())
}

/// Feed commands from `reader`, then either return at EOF or, when
/// `stop_on_eof` is false, stay pending so only a signal ends the run.
async fn drive_input<R>(
    reader: R,
    handle: PollerHandle,
    stop_on_eof: bool,
) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    read_commands(reader, handle).await?;
    if stop_on_eof {
        return Ok(());
    }
    tracing::info!("input closed, polling continues until a signal");
    std::future::pending::<()>().await;
    Ok(())
}

/// Feed stdin commands to the orchestrator until EOF.
async fn read_commands<R>(reader: R, handle: PollerHandle) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match parse_command(&line) {
            Ok(InputCommand::Watch(id)) => handle.watch(id).await?,
            Ok(InputCommand::Unwatch(id)) => handle.unwatch(id).await?,
            Ok(InputCommand::List) => {
                let ids: Vec<u64> = handle
                    .watched()
                    .await?
                    .into_iter()
                    .map(EntityId::get)
                    .collect();
                println!("{}", serde_json::json!({ "type": "watched", "data": ids }));
            }
            Err(reason) => tracing::warn!(%reason, "ignoring input line"),
        }
    }
    Ok(())
}

async fn print_notifications(mut rx: broadcast::Receiver<Notification>, cancel: CancellationToken) {
    loop {
        let note = tokio::select! {
            () = cancel.cancelled() => break,
            note = rx.recv() => note,
        };
        match note {
            Ok(note) => match serde_json::to_string(&note) {
                Ok(json) => println!("{json}"),
                Err(e) => tracing::error!("failed to encode notification: {e}"),
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "notification printer lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
