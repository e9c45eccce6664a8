//! Poll scheduler: arms one-shot re-poll timers and cancels them.
//!
//! A timer never touches entity state itself. When it fires it only sends
//! a [`TimerFired`] into the control loop, which re-reads the registry and
//! decides whether the firing still counts.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use actpoll_core::registry::{TimerHandle, WatchedEntity};
use actpoll_core::types::{EntityId, QueryParams};

// ─── Timer ───────────────────────────────────────────────────────────

/// Handle of an armed timer task. Cancelling is idempotent.
#[derive(Debug)]
pub struct ArmedTimer {
    id: u64,
    token: CancellationToken,
}

impl ArmedTimer {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl TimerHandle for ArmedTimer {
    fn cancel(&self) {
        self.token.cancel();
    }
}

/// Delivered to the control loop when a timer elapses.
#[derive(Debug, Clone, PartialEq)]
pub struct TimerFired {
    pub entity_id: EntityId,
    pub session: u64,
    pub timer_id: u64,
    pub query: QueryParams,
}

// ─── Scheduler ───────────────────────────────────────────────────────

#[derive(Debug)]
pub struct PollScheduler {
    delay: Duration,
    next_timer_id: u64,
    fired_tx: mpsc::UnboundedSender<TimerFired>,
}

impl PollScheduler {
    pub fn new(delay: Duration, fired_tx: mpsc::UnboundedSender<TimerFired>) -> Self {
        Self {
            delay,
            next_timer_id: 1,
            fired_tx,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Arm the next poll for `entry` after the configured delay.
    ///
    /// Refuses while a fetch is pending or a timer is already armed, so an
    /// entity never has two polls lined up. Returns whether a timer was armed.
    pub fn arm_next_poll(
        &mut self,
        entry: &mut WatchedEntity<ArmedTimer>,
        query: QueryParams,
    ) -> bool {
        if entry.pending || entry.is_armed() {
            tracing::debug!(
                entity_id = %entry.entity_id,
                pending = entry.pending,
                armed = entry.is_armed(),
                "next poll already lined up, not arming"
            );
            return false;
        }

        let timer_id = self.next_timer_id;
        self.next_timer_id = self.next_timer_id.saturating_add(1);

        let token = CancellationToken::new();
        let fired = TimerFired {
            entity_id: entry.entity_id,
            session: entry.session,
            timer_id,
            query,
        };
        tokio::spawn(run_timer(
            self.delay,
            fired,
            self.fired_tx.clone(),
            token.clone(),
        ));

        tracing::trace!(
            entity_id = %entry.entity_id,
            timer_id,
            delay_ms = self.delay.as_millis() as u64,
            "poll armed"
        );
        entry.timer = Some(ArmedTimer {
            id: timer_id,
            token,
        });
        true
    }

    /// Cancel the armed timer (if any) and clear `pending`.
    pub fn cancel_pending(&self, entry: &mut WatchedEntity<ArmedTimer>) {
        entry.cancel_timer();
        entry.pending = false;
    }
}

async fn run_timer(
    delay: Duration,
    fired: TimerFired,
    tx: mpsc::UnboundedSender<TimerFired>,
    token: CancellationToken,
) {
    tokio::select! {
        _ = token.cancelled() => {}
        _ = tokio::time::sleep(delay) => {
            // The loop may already be gone during shutdown.
            let _ = tx.send(fired);
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use actpoll_core::registry::WatchRegistry;

    fn query() -> QueryParams {
        QueryParams::Since {
            date_start: 0,
            number: 100,
        }
    }

    fn setup() -> (
        PollScheduler,
        mpsc::UnboundedReceiver<TimerFired>,
        WatchRegistry<ArmedTimer>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let scheduler = PollScheduler::new(Duration::from_millis(8_000), tx);
        let mut registry = WatchRegistry::new();
        registry.start_watching(EntityId(1));
        (scheduler, rx, registry)
    }

    #[tokio::test(start_paused = true)]
    async fn fires_after_delay() {
        let (mut scheduler, mut rx, mut registry) = setup();
        let entry = registry.get_mut(EntityId(1)).expect("entry");
        let start = tokio::time::Instant::now();

        assert!(scheduler.arm_next_poll(entry, query()));
        let fired = rx.recv().await.expect("fired");

        assert!(start.elapsed() >= Duration::from_millis(8_000));
        assert_eq!(fired.entity_id, EntityId(1));
        assert_eq!(Some(fired.timer_id), entry.timer.as_ref().map(ArmedTimer::id));
        assert_eq!(fired.session, entry.session);
    }

    #[tokio::test(start_paused = true)]
    async fn refuses_while_pending_or_armed() {
        let (mut scheduler, _rx, mut registry) = setup();
        let entry = registry.get_mut(EntityId(1)).expect("entry");

        entry.pending = true;
        assert!(!scheduler.arm_next_poll(entry, query()));
        assert!(!entry.is_armed());

        entry.pending = false;
        assert!(scheduler.arm_next_poll(entry, query()));
        let first = entry.timer.as_ref().map(ArmedTimer::id);
        assert!(!scheduler.arm_next_poll(entry, query()));
        assert_eq!(entry.timer.as_ref().map(ArmedTimer::id), first);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timer_never_fires() {
        let (mut scheduler, mut rx, mut registry) = setup();
        let entry = registry.get_mut(EntityId(1)).expect("entry");
        scheduler.arm_next_poll(entry, query());
        entry.pending = true;

        scheduler.cancel_pending(entry);
        assert!(!entry.is_armed());
        assert!(!entry.pending);

        tokio::time::sleep(Duration::from_millis(20_000)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_watching_cancels_armed_timer() {
        let (mut scheduler, mut rx, mut registry) = setup();
        let entry = registry.get_mut(EntityId(1)).expect("entry");
        scheduler.arm_next_poll(entry, query());

        let removed = registry.stop_watching(EntityId(1)).expect("watched");
        assert!(removed.timer.is_none());

        tokio::time::sleep(Duration::from_millis(20_000)).await;
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn cancel_is_idempotent() {
        let timer = ArmedTimer {
            id: 1,
            token: CancellationToken::new(),
        };
        timer.cancel();
        timer.cancel();
        assert!(timer.is_cancelled());
    }
}
