//! End-to-end polling scenarios through the public orchestrator API.

use std::sync::Arc;
use std::time::Duration;

use actpoll_daemon::config::PollerConfig;
use actpoll_daemon::notify::{Notification, POLLING_FAIL_EVENT};
use actpoll_daemon::orchestrator::{Orchestrator, PollerHandle};
use actpoll_daemon::types::EntityId;
use actpoll_gateway::store::{EventStore, MemoryEventStore};
use actpoll_gateway::transport::{FetchRequest, Transport, TransportError, TransportResponse};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

const NOW: i64 = 1_772_000_000_000;

type Reply = oneshot::Sender<Result<TransportResponse, TransportError>>;

struct ChannelTransport {
    tx: mpsc::UnboundedSender<(FetchRequest, Reply)>,
}

impl Transport for ChannelTransport {
    async fn fetch(&self, request: FetchRequest) -> Result<TransportResponse, TransportError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send((request, reply_tx))
            .map_err(|_| TransportError::Closed)?;
        reply_rx.await.map_err(|_| TransportError::Closed)?
    }
}

struct Harness {
    handle: PollerHandle,
    requests: mpsc::UnboundedReceiver<(FetchRequest, Reply)>,
    notes: broadcast::Receiver<Notification>,
    join: JoinHandle<MemoryEventStore>,
}

fn start() -> Harness {
    let (tx, requests) = mpsc::unbounded_channel();
    let (orch, handle) = Orchestrator::new(
        &PollerConfig::default(),
        ChannelTransport { tx },
        MemoryEventStore::new(),
    );
    let notes = handle.subscribe();
    let join = tokio::spawn(orch.with_clock(Arc::new(|| NOW)).run());
    Harness {
        handle,
        requests,
        notes,
        join,
    }
}

/// Collect notifications until one matches `pred`.
async fn wait_for(
    notes: &mut broadcast::Receiver<Notification>,
    pred: impl Fn(&Notification) -> bool,
) -> Vec<Notification> {
    let mut seen = Vec::new();
    loop {
        let note = notes.recv().await.expect("notification");
        let hit = pred(&note);
        seen.push(note);
        if hit {
            return seen;
        }
    }
}

// ── 1. watch_then_cursor_then_failure ──────────────────────────────

#[tokio::test(start_paused = true)]
async fn watch_then_cursor_then_failure() {
    let mut h = start();
    h.handle.watch(EntityId(42)).await.expect("watch");

    // Immediate fetch from "now".
    let (req, reply) = h.requests.recv().await.expect("first fetch");
    assert_eq!(req.path, "/entities/42/activity");
    assert_eq!(req.query_param("date_start"), Some(NOW.to_string().as_str()));
    let replied_at = Instant::now();
    reply
        .send(Ok(TransportResponse::ok(
            serde_json::json!({"items": [], "nextAfter": "X"}),
        )))
        .expect("reply");

    // Next fetch only after the fixed interval, continuing from the cursor.
    let (req, reply) = h.requests.recv().await.expect("second fetch");
    assert!(replied_at.elapsed() >= Duration::from_millis(8_000));
    assert_eq!(req.query_param("search_after"), Some("\"X\""));
    assert!(req.query_param("date_start").is_none());

    reply
        .send(Err(TransportError::Connection("connection reset".into())))
        .expect("reply");

    let seen = wait_for(&mut h.notes, |n| matches!(n, Notification::Track(_))).await;
    assert!(
        seen.iter()
            .any(|n| matches!(n, Notification::ErrorNotice { entity_id, .. } if *entity_id == EntityId(42)))
    );
    assert_eq!(h.handle.watched().await.expect("watched"), Vec::<EntityId>::new());

    // Nothing else happens afterwards: no retry, no second telemetry event.
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(h.requests.try_recv().is_err());
    let mut fails = seen
        .iter()
        .filter(|n| matches!(n, Notification::Track(t) if t.name == POLLING_FAIL_EVENT && t.entity_id == EntityId(42)))
        .count();
    while let Ok(note) = h.notes.try_recv() {
        if matches!(note, Notification::Track(_)) {
            fails += 1;
        }
    }
    assert_eq!(fails, 1);

    h.handle.shutdown().await.expect("shutdown");
    h.join.await.expect("join");
}

// ── 2. unwatch_while_in_flight ─────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn unwatch_while_in_flight() {
    let mut h = start();
    h.handle.watch(EntityId(7)).await.expect("watch");
    let (_req, reply) = h.requests.recv().await.expect("fetch");

    h.handle.unwatch(EntityId(7)).await.expect("unwatch");
    assert!(h.handle.watched().await.expect("watched").is_empty());

    reply
        .send(Ok(TransportResponse::ok(serde_json::json!({
            "items": [{"activityTs": 11}],
            "nextAfter": "after-unwatch"
        }))))
        .expect("reply");
    wait_for(&mut h.notes, |n| {
        matches!(n, Notification::ActivityLogUpdated { .. })
    })
    .await;

    assert!(h.handle.watched().await.expect("watched").is_empty());
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(h.requests.try_recv().is_err(), "no poll may follow an unwatch");

    h.handle.shutdown().await.expect("shutdown");
    let store = h.join.await.expect("join");
    // The late page is still delivered to the store.
    assert_eq!(store.events(EntityId(7)).len(), 1);
}

// ── 3. unwatch_before_timer_fires ──────────────────────────────────

#[tokio::test(start_paused = true)]
async fn unwatch_before_timer_fires() {
    let mut h = start();
    h.handle.watch(EntityId(8)).await.expect("watch");
    let (_req, reply) = h.requests.recv().await.expect("fetch");
    reply
        .send(Ok(TransportResponse::ok(
            serde_json::json!({"items": [], "nextAfter": "c"}),
        )))
        .expect("reply");
    wait_for(&mut h.notes, |n| {
        matches!(n, Notification::ActivityLogUpdated { .. })
    })
    .await;

    tokio::time::sleep(Duration::from_millis(4_000)).await;
    h.handle.unwatch(EntityId(8)).await.expect("unwatch");
    assert!(h.handle.watched().await.expect("watched").is_empty());

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(h.requests.try_recv().is_err());

    h.handle.shutdown().await.expect("shutdown");
    h.join.await.expect("join");
}

// ── 4. rewatch_after_failure_starts_fresh ──────────────────────────

#[tokio::test(start_paused = true)]
async fn rewatch_after_failure_starts_fresh() {
    let mut h = start();
    h.handle.watch(EntityId(3)).await.expect("watch");
    let (_req, reply) = h.requests.recv().await.expect("fetch");
    reply
        .send(Ok(TransportResponse {
            status: 500,
            body: serde_json::Value::Null,
        }))
        .expect("reply");
    wait_for(&mut h.notes, |n| matches!(n, Notification::Track(_))).await;

    h.handle.watch(EntityId(3)).await.expect("rewatch");
    let (req, _reply) = h.requests.recv().await.expect("fresh fetch");
    assert_eq!(req.query_param("date_start"), Some(NOW.to_string().as_str()));
    assert_eq!(h.handle.watched().await.expect("watched"), vec![EntityId(3)]);

    h.handle.shutdown().await.expect("shutdown");
    h.join.await.expect("join");
}

// ── 5. rewatch_while_previous_fetch_in_flight ──────────────────────

#[tokio::test(start_paused = true)]
async fn rewatch_while_previous_fetch_in_flight() {
    let mut h = start();
    h.handle.watch(EntityId(7)).await.expect("watch");
    let (_first, first_reply) = h.requests.recv().await.expect("first fetch");

    h.handle.unwatch(EntityId(7)).await.expect("unwatch");
    h.handle.watch(EntityId(7)).await.expect("rewatch");
    assert_eq!(h.handle.watched().await.expect("watched"), vec![EntityId(7)]);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(
        h.requests.try_recv().is_err(),
        "entity 7 must not have two fetches outstanding"
    );

    first_reply
        .send(Ok(TransportResponse::ok(
            serde_json::json!({"items": [], "nextAfter": "stale"}),
        )))
        .expect("reply");

    let (req, _reply) = h.requests.recv().await.expect("fresh fetch");
    assert_eq!(req.query_param("date_start"), Some(NOW.to_string().as_str()));
    assert!(req.query_param("search_after").is_none());

    h.handle.shutdown().await.expect("shutdown");
    h.join.await.expect("join");
}
