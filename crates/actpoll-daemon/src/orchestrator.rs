//! Orchestrator: the control loop that keeps watched entities polled.
//!
//! Per entity: `Idle --watch--> Polling --success--> Scheduled --timer-->
//! Polling ...`, and back to `Idle` on unwatch or on a failed poll.
//!
//! Every transition runs inside [`Orchestrator::run`], one event at a time:
//! commands from [`PollerHandle`], fetch completions, and timer firings.
//! Fetch and timer tasks never touch state; they only send an event back.
//! Anything that arrives for an entity no longer watched (or watched again
//! under a newer session) is dropped at that point.
//!
//! At most one fetch per entity id is outstanding, across sessions: a
//! re-watch while the previous session's fetch is still in flight waits
//! for that fetch to land before issuing its own first poll.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use actpoll_core::cursor::{CursorResolver, Resolution, carry_cursor};
use actpoll_core::registry::WatchRegistry;
use actpoll_core::types::{EntityId, PollIntent, PollResult, QueryParams};
use actpoll_gateway::adapter::{ActivityAdapter, record_success};
use actpoll_gateway::store::EventStore;
use actpoll_gateway::transport::Transport;

use crate::config::PollerConfig;
use crate::notify::{ACTIVITY_ERROR_MESSAGE, Notification, Notifier, TrackEvent};
use crate::scheduler::{ArmedTimer, PollScheduler, TimerFired};

/// Wall clock in epoch milliseconds.
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

fn system_clock() -> Clock {
    Arc::new(|| Utc::now().timestamp_millis())
}

// ─── Events ──────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum Command {
    Watch(EntityId),
    Unwatch(EntityId),
    /// Reply with the currently watched ids.
    Watched(oneshot::Sender<Vec<EntityId>>),
    Shutdown,
}

/// Result of one fetch, delivered back to the loop.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchCompleted {
    pub entity_id: EntityId,
    pub session: u64,
    pub query: QueryParams,
    pub result: PollResult,
}

// ─── Handle ──────────────────────────────────────────────────────────

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PollerError {
    #[error("poller is not running")]
    Stopped,
}

/// Cloneable front door to a running orchestrator.
#[derive(Debug, Clone)]
pub struct PollerHandle {
    command_tx: mpsc::Sender<Command>,
    notifier: Notifier,
}

impl PollerHandle {
    pub async fn watch(&self, entity_id: EntityId) -> Result<(), PollerError> {
        self.send(Command::Watch(entity_id)).await
    }

    pub async fn unwatch(&self, entity_id: EntityId) -> Result<(), PollerError> {
        self.send(Command::Unwatch(entity_id)).await
    }

    /// Watched ids, ascending. Answered after every earlier command.
    pub async fn watched(&self) -> Result<Vec<EntityId>, PollerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(Command::Watched(reply_tx)).await?;
        reply_rx.await.map_err(|_| PollerError::Stopped)
    }

    pub async fn shutdown(&self) -> Result<(), PollerError> {
        self.send(Command::Shutdown).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifier.subscribe()
    }

    async fn send(&self, command: Command) -> Result<(), PollerError> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| PollerError::Stopped)
    }
}

// ─── Orchestrator ────────────────────────────────────────────────────

pub struct Orchestrator<T, S> {
    registry: WatchRegistry<ArmedTimer>,
    scheduler: PollScheduler,
    resolver: CursorResolver,
    adapter: ActivityAdapter,
    transport: Arc<T>,
    store: S,
    /// Entity ids with a fetch outstanding, whichever session issued it.
    in_flight: HashSet<EntityId>,
    notifier: Notifier,
    clock: Clock,
    command_rx: mpsc::Receiver<Command>,
    completion_tx: mpsc::UnboundedSender<FetchCompleted>,
    completion_rx: mpsc::UnboundedReceiver<FetchCompleted>,
    timer_rx: mpsc::UnboundedReceiver<TimerFired>,
    cancel: CancellationToken,
}

impl<T, S> Orchestrator<T, S>
where
    T: Transport + 'static,
    S: EventStore,
{
    pub fn new(config: &PollerConfig, transport: T, store: S) -> (Self, PollerHandle) {
        let (command_tx, command_rx) = mpsc::channel(config.command_capacity);
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let notifier = Notifier::new(config.notification_capacity);

        let orchestrator = Self {
            registry: WatchRegistry::new(),
            scheduler: PollScheduler::new(config.poll_interval(), timer_tx),
            resolver: CursorResolver::new(config.page_limit),
            adapter: ActivityAdapter::new(config.path_prefix.clone()),
            transport: Arc::new(transport),
            store,
            in_flight: HashSet::new(),
            notifier: notifier.clone(),
            clock: system_clock(),
            command_rx,
            completion_tx,
            completion_rx,
            timer_rx,
            cancel: CancellationToken::new(),
        };
        let handle = PollerHandle {
            command_tx,
            notifier,
        };
        (orchestrator, handle)
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn registry(&self) -> &WatchRegistry<ArmedTimer> {
        &self.registry
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Run until shutdown, then hand the event store back.
    ///
    /// Stops on cancellation, a `Shutdown` command, or when every
    /// [`PollerHandle`] is dropped. All armed timers are cancelled on exit;
    /// fetches still in flight complete into a closed channel.
    pub async fn run(mut self) -> S {
        info!("orchestrator: event loop started");
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    info!("orchestrator: cancellation requested, shutting down");
                    break;
                }
                command = self.command_rx.recv() => match command {
                    Some(Command::Shutdown) => {
                        info!("orchestrator: shutdown command received");
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        info!("orchestrator: all handles dropped, shutting down");
                        break;
                    }
                },
                Some(done) = self.completion_rx.recv() => self.handle_completion(done),
                Some(fired) = self.timer_rx.recv() => self.handle_timer(fired),
            }
        }
        let dropped = self.registry.clear();
        info!(watched = dropped, "orchestrator: stopped");
        self.store
    }

    // ── Commands ─────────────────────────────────────────────────────

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Watch(entity_id) => self.start_watching(entity_id),
            Command::Unwatch(entity_id) => self.stop_watching(entity_id),
            Command::Watched(reply) => {
                let _ = reply.send(self.registry.watched());
            }
            Command::Shutdown => {}
        }
    }

    fn start_watching(&mut self, entity_id: EntityId) {
        if !self.registry.start_watching(entity_id) {
            debug!(entity_id = %entity_id, "already watching");
            return;
        }
        info!(entity_id = %entity_id, "watch started");
        if self.in_flight.contains(&entity_id) {
            debug!(
                entity_id = %entity_id,
                "previous fetch still in flight, deferring first poll"
            );
            return;
        }
        let query = self.resolver.initial_query((self.clock)());
        self.dispatch_fetch(entity_id, query);
    }

    /// Issue the first poll of a watch that was deferred behind a fetch of
    /// an earlier session.
    fn start_deferred(&mut self, entity_id: EntityId) {
        let waiting = self
            .registry
            .get(entity_id)
            .is_some_and(|entry| !entry.pending && !entry.is_armed());
        if !waiting {
            return;
        }
        debug!(entity_id = %entity_id, "starting deferred first poll");
        let query = self.resolver.initial_query((self.clock)());
        self.dispatch_fetch(entity_id, query);
    }

    fn stop_watching(&mut self, entity_id: EntityId) {
        if let Some(entry) = self.registry.get_mut(entity_id) {
            self.scheduler.cancel_pending(entry);
        }
        // A fetch already in flight is left to finish; the session check in
        // `handle_completion` drops its result.
        match self.registry.stop_watching(entity_id) {
            Some(entry) => info!(
                entity_id = %entity_id,
                session = entry.session,
                "watch stopped"
            ),
            None => debug!(entity_id = %entity_id, "unwatch for unwatched entity"),
        }
    }

    // ── Fetch ────────────────────────────────────────────────────────

    /// Mark the entity pending and spawn its fetch.
    fn dispatch_fetch(&mut self, entity_id: EntityId, query: QueryParams) {
        let Some(entry) = self.registry.get_mut(entity_id) else {
            return;
        };
        if entry.pending || self.in_flight.contains(&entity_id) {
            warn!(entity_id = %entity_id, "fetch already outstanding, not dispatching");
            return;
        }
        entry.pending = true;
        let session = entry.session;
        self.in_flight.insert(entity_id);

        let adapter = self.adapter.clone();
        let transport = Arc::clone(&self.transport);
        let completion_tx = self.completion_tx.clone();
        tokio::spawn(async move {
            let intent = PollIntent { entity_id, query };
            let result = adapter.issue_fetch(&*transport, &intent).await;
            // Closed only after the loop has exited.
            let _ = completion_tx.send(FetchCompleted {
                entity_id,
                session,
                query: intent.query,
                result,
            });
        });
    }

    fn handle_completion(&mut self, done: FetchCompleted) {
        let FetchCompleted {
            entity_id,
            session,
            query,
            result,
        } = done;
        self.in_flight.remove(&entity_id);

        // Delivery to the store and to subscribers happens for every
        // response, watched or not.
        match &result {
            PollResult::Success(page) => {
                let appended = record_success(&mut self.store, entity_id, &result);
                debug!(entity_id = %entity_id, appended, "activity page received");
                self.notifier.emit(Notification::ActivityLogUpdated {
                    entity_id,
                    items: page.items.clone(),
                    total_items: page.total_items,
                    oldest_item_ts: page.oldest_item_ts,
                    query,
                });
            }
            PollResult::Failure { reason } => {
                warn!(entity_id = %entity_id, %reason, "activity fetch failed");
                self.notifier.emit(Notification::ErrorNotice {
                    entity_id,
                    message: ACTIVITY_ERROR_MESSAGE.to_owned(),
                });
            }
        }

        if !self.registry.is_current(entity_id, session) {
            debug!(
                entity_id = %entity_id,
                session,
                "completion for a watch that has ended, discarding"
            );
            self.start_deferred(entity_id);
            return;
        }

        let now_ms = (self.clock)();
        let Some(entry) = self.registry.get_mut(entity_id) else {
            return;
        };
        entry.pending = false;

        let resolution = self.resolver.resolve(
            entry.cursor.as_ref(),
            &result,
            self.store.newest_timestamp(entity_id),
            now_ms,
        );
        match resolution {
            Resolution::Continue(next) => {
                entry.cursor = carry_cursor(entry.cursor.as_ref(), &result);
                self.scheduler.arm_next_poll(entry, next);
            }
            Resolution::Stop => {
                self.registry.stop_watching(entity_id);
                self.notifier
                    .emit(Notification::Track(TrackEvent::polling_fail(entity_id)));
                info!(entity_id = %entity_id, "polling stopped after failed fetch");
            }
        }
    }

    // ── Timers ───────────────────────────────────────────────────────

    fn handle_timer(&mut self, fired: TimerFired) {
        let Some(entry) = self.registry.get_mut(fired.entity_id) else {
            debug!(entity_id = %fired.entity_id, "timer fired for unwatched entity, ignoring");
            return;
        };
        let armed_id = entry.timer.as_ref().map(ArmedTimer::id);
        if entry.session != fired.session || armed_id != Some(fired.timer_id) {
            debug!(
                entity_id = %fired.entity_id,
                timer_id = fired.timer_id,
                "stale timer, ignoring"
            );
            return;
        }
        entry.timer = None;
        self.dispatch_fetch(fired.entity_id, fired.query);
    }
}

// ─── Tests ───────────────────────────────────────────────────────────
