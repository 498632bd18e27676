use std::{sync::Arc, time::Duration, time::SystemTime};

use dashmap::DashMap;
use tokio::{
    sync::Mutex,
    task::JoinHandle,
    time::{Instant, interval_at},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dto::{
        events::{ServerEvent, TimeExpiredEvent, TimerStartedEvent, TimerUpdatedEvent},
        format_system_time,
    },
    state::hub::{ConnectionId, EventSender, GroupHub},
};

pub(crate) const EVENT_TIMER_STARTED: &str = "timer-started";
pub(crate) const EVENT_TIMER_UPDATED: &str = "timer-updated";
pub(crate) const EVENT_TIME_EXPIRED: &str = "time-expired";

const TICK_PERIOD: Duration = Duration::from_secs(1);

/// Point-in-time view of a group's countdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerSnapshot {
    /// Countdown length in seconds.
    pub duration: u32,
    /// Remaining seconds, never negative.
    pub time_left: u32,
    /// When the countdown was started (or first corrected).
    pub started_at: SystemTime,
    /// Whether a ticker is counting down.
    pub running: bool,
}

#[derive(Default)]
struct TimerSlot {
    generation: u64,
    snapshot: Option<TimerSnapshot>,
    handle: Option<JoinHandle<()>>,
}

impl TimerSlot {
    /// Invalidate and cancel the current ticker, if any.
    fn cancel(&mut self) -> bool {
        self.generation += 1;
        let had_ticker = match self.handle.take() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        };
        if let Some(snapshot) = self.snapshot.as_mut() {
            snapshot.running = false;
        }
        had_ticker
    }
}

/// Server-authoritative per-group countdowns with at most one live ticker per group.
///
/// Each group owns a slot behind its own mutex. Starting, correcting, stopping
/// and every tick happen while holding that mutex, and a generation counter
/// lets a ticker that lost the race for the lock notice it was superseded.
pub struct TimerEngine {
    slots: DashMap<Uuid, Arc<Mutex<TimerSlot>>>,
    hub: Arc<GroupHub>,
    period: Duration,
}

impl TimerEngine {
    /// Create an engine publishing on `hub` with a one second cadence.
    pub fn new(hub: Arc<GroupHub>) -> Self {
        Self {
            slots: DashMap::new(),
            hub,
            period: TICK_PERIOD,
        }
    }

    fn slot(&self, group_id: Uuid) -> Arc<Mutex<TimerSlot>> {
        self.slots.entry(group_id).or_default().clone()
    }

    fn existing_slot(&self, group_id: Uuid) -> Option<Arc<Mutex<TimerSlot>>> {
        self.slots.get(&group_id).map(|slot| slot.clone())
    }

    /// Replace any running countdown with a fresh one of `duration` seconds.
    pub async fn start_timer(&self, group_id: Uuid, duration: u32) -> TimerSnapshot {
        self.start_timer_at(group_id, duration, SystemTime::now())
            .await
    }

    /// Same as [`start_timer`](Self::start_timer) with an explicit start timestamp.
    pub async fn start_timer_at(
        &self,
        group_id: Uuid,
        duration: u32,
        started_at: SystemTime,
    ) -> TimerSnapshot {
        let slot = self.slot(group_id);
        let mut guard = slot.lock().await;
        if guard.cancel() {
            debug!(group_id = %group_id, "previous ticker cancelled");
        }

        let snapshot = TimerSnapshot {
            duration,
            time_left: duration,
            started_at,
            running: duration > 0,
        };
        guard.snapshot = Some(snapshot);

        publish(
            &self.hub,
            group_id,
            EVENT_TIMER_STARTED,
            &TimerStartedEvent {
                group_id,
                duration,
                time_left: duration,
                started_at: format_system_time(started_at),
            },
        );

        if duration == 0 {
            publish(
                &self.hub,
                group_id,
                EVENT_TIME_EXPIRED,
                &TimeExpiredEvent { group_id },
            );
            return snapshot;
        }

        let generation = guard.generation;
        let first_tick = Instant::now() + self.period;
        guard.handle = Some(tokio::spawn(run_ticker(
            slot.clone(),
            self.hub.clone(),
            group_id,
            generation,
            first_tick,
            self.period,
        )));
        info!(group_id = %group_id, duration, "timer started");

        snapshot
    }

    /// Overwrite the remaining time without touching the cadence.
    pub async fn update_timer(
        &self,
        group_id: Uuid,
        time_left: u32,
        updated_by: Uuid,
    ) -> TimerSnapshot {
        let slot = self.slot(group_id);
        let mut guard = slot.lock().await;
        let snapshot = guard.snapshot.get_or_insert(TimerSnapshot {
            duration: time_left,
            time_left,
            started_at: SystemTime::now(),
            running: false,
        });
        snapshot.time_left = time_left;
        let snapshot = *snapshot;

        publish(
            &self.hub,
            group_id,
            EVENT_TIMER_UPDATED,
            &timer_updated(group_id, &snapshot, Some(updated_by), false),
        );
        info!(group_id = %group_id, time_left, updated_by = %updated_by, "timer corrected");

        snapshot
    }

    /// Cancel the ticker if present. Returns whether one was running.
    pub async fn stop_timer(&self, group_id: Uuid) -> bool {
        let Some(slot) = self.existing_slot(group_id) else {
            return false;
        };
        let stopped = slot.lock().await.cancel();
        if stopped {
            info!(group_id = %group_id, "timer stopped");
        }
        stopped
    }

    /// Forget the group's countdown unless a ticker is live or its slot is busy.
    ///
    /// Returns whether the group holds no countdown state afterwards. The check
    /// and the removal happen under the map's shard lock, so a concurrent start
    /// either lands before (and keeps the slot) or creates a fresh slot after.
    pub fn release_idle(&self, group_id: Uuid) -> bool {
        self.slots.remove_if(&group_id, |_, slot| {
            slot.try_lock()
                .map(|guard| guard.handle.is_none())
                .unwrap_or(false)
        });
        !self.slots.contains_key(&group_id)
    }

    /// Current countdown of the group, if one was ever started or corrected.
    pub async fn snapshot(&self, group_id: Uuid) -> Option<TimerSnapshot> {
        let slot = self.existing_slot(group_id)?;
        let guard = slot.lock().await;
        guard.snapshot
    }

    /// Whether a ticker is live. A slot busy with a tick counts as running.
    pub fn is_running(&self, group_id: Uuid) -> bool {
        self.existing_slot(group_id)
            .map(|slot| match slot.try_lock() {
                Ok(guard) => guard.handle.is_some(),
                Err(_) => true,
            })
            .unwrap_or(false)
    }

    /// Number of groups holding a live ticker.
    pub fn live_tickers(&self) -> usize {
        self.slots
            .iter()
            .filter(|entry| match entry.value().try_lock() {
                Ok(guard) => guard.handle.is_some(),
                Err(_) => true,
            })
            .count()
    }

    /// Subscribe `connection` and replay the current countdown to it only.
    ///
    /// Both happen under the slot lock, so the subscriber sees the replay
    /// before any later tick and misses none in between.
    pub async fn subscribe_with_replay(
        &self,
        group_id: Uuid,
        connection: ConnectionId,
        tx: EventSender,
    ) -> Option<TimerSnapshot> {
        let Some(slot) = self.existing_slot(group_id) else {
            self.hub.subscribe(group_id, connection, tx);
            return None;
        };
        let guard = slot.lock().await;
        self.hub.subscribe(group_id, connection, tx);
        let snapshot = guard.snapshot?;
        match ServerEvent::json(
            EVENT_TIMER_UPDATED,
            &timer_updated(group_id, &snapshot, None, true),
        ) {
            Ok(event) => {
                self.hub.send_to(group_id, connection, event);
            }
            Err(err) => warn!(error = %err, "failed to serialise timer replay"),
        }
        Some(snapshot)
    }
}

fn timer_updated(
    group_id: Uuid,
    snapshot: &TimerSnapshot,
    updated_by: Option<Uuid>,
    replay: bool,
) -> TimerUpdatedEvent {
    TimerUpdatedEvent {
        group_id,
        time_left: snapshot.time_left,
        duration: snapshot.duration,
        running: snapshot.running,
        started_at: format_system_time(snapshot.started_at),
        updated_by,
        replay,
    }
}

fn publish<T: serde::Serialize>(hub: &GroupHub, group_id: Uuid, kind: &str, payload: &T) {
    match ServerEvent::json(kind, payload) {
        Ok(event) => {
            hub.publish(group_id, event);
        }
        Err(err) => warn!(event = kind, error = %err, "failed to serialise timer event"),
    }
}

async fn run_ticker(
    slot: Arc<Mutex<TimerSlot>>,
    hub: Arc<GroupHub>,
    group_id: Uuid,
    generation: u64,
    first_tick: Instant,
    period: Duration,
) {
    // Cadence is anchored to the start call, not to when the task first runs.
    let mut interval = interval_at(first_tick, period);
    loop {
        interval.tick().await;
        let mut guard = slot.lock().await;
        if guard.generation != generation {
            return;
        }
        let Some(snapshot) = guard.snapshot.as_mut() else {
            return;
        };

        snapshot.time_left = snapshot.time_left.saturating_sub(1);
        let expired = snapshot.time_left == 0;
        if expired {
            snapshot.running = false;
        }
        let tick = timer_updated(group_id, snapshot, None, false);
        publish(&hub, group_id, EVENT_TIMER_UPDATED, &tick);

        if expired {
            guard.handle = None;
            publish(
                &hub,
                group_id,
                EVENT_TIME_EXPIRED,
                &TimeExpiredEvent { group_id },
            );
            info!(group_id = %group_id, "timer expired");
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn engine() -> (TimerEngine, Arc<GroupHub>) {
        let hub = Arc::new(GroupHub::new());
        (TimerEngine::new(hub.clone()), hub)
    }

    fn listen(hub: &GroupHub, group_id: Uuid) -> mpsc::UnboundedReceiver<ServerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        hub.subscribe(group_id, Uuid::new_v4(), tx);
        rx
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn time_left(event: &ServerEvent) -> u64 {
        event.data["timeLeft"].as_u64().unwrap()
    }

    async fn advance_secs(secs: u64) {
        for _ in 0..secs {
            tokio::time::advance(Duration::from_secs(1)).await;
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_reaches_zero_then_expires_once() {
        let (engine, hub) = engine();
        let group = Uuid::new_v4();
        let mut rx = listen(&hub, group);

        engine.start_timer(group, 600).await;
        advance_secs(605).await;

        let events = drain(&mut rx);
        assert_eq!(events[0].event, EVENT_TIMER_STARTED);
        let ticks: Vec<u64> = events
            .iter()
            .filter(|e| e.event == EVENT_TIMER_UPDATED)
            .map(time_left)
            .collect();
        assert_eq!(ticks.len(), 600);
        assert!(ticks.windows(2).all(|w| w[1] < w[0]));
        assert_eq!(ticks.last(), Some(&0));
        assert_eq!(events.last().unwrap().event, EVENT_TIME_EXPIRED);
        assert_eq!(
            events.iter().filter(|e| e.event == EVENT_TIME_EXPIRED).count(),
            1
        );
        assert!(!engine.is_running(group));
    }

    #[tokio::test(start_paused = true)]
    async fn restarting_keeps_a_single_ticker() {
        let (engine, hub) = engine();
        let group = Uuid::new_v4();
        let mut rx = listen(&hub, group);

        engine.start_timer(group, 10).await;
        engine.start_timer(group, 10).await;
        assert_eq!(engine.live_tickers(), 1);

        advance_secs(3).await;
        let ticks: Vec<u64> = drain(&mut rx)
            .iter()
            .filter(|e| e.event == EVENT_TIMER_UPDATED)
            .map(time_left)
            .collect();
        assert_eq!(ticks, vec![9, 8, 7]);
    }

    #[tokio::test(start_paused = true)]
    async fn correction_jumps_without_resetting_cadence() {
        let (engine, hub) = engine();
        let group = Uuid::new_v4();
        let corrector = Uuid::new_v4();
        let mut rx = listen(&hub, group);

        engine.start_timer(group, 100).await;
        advance_secs(2).await;
        engine.update_timer(group, 50, corrector).await;
        advance_secs(1).await;

        let updates: Vec<ServerEvent> = drain(&mut rx)
            .into_iter()
            .filter(|e| e.event == EVENT_TIMER_UPDATED)
            .collect();
        let values: Vec<u64> = updates.iter().map(time_left).collect();
        assert_eq!(values, vec![99, 98, 50, 49]);
        assert_eq!(updates[2].data["updatedBy"], corrector.to_string());
        assert!(updates[3].data["updatedBy"].is_null());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent_and_silences_ticks() {
        let (engine, hub) = engine();
        let group = Uuid::new_v4();
        assert!(!engine.stop_timer(group).await);

        engine.start_timer(group, 30).await;
        let mut rx = listen(&hub, group);
        assert!(engine.stop_timer(group).await);
        assert!(!engine.stop_timer(group).await);

        advance_secs(3).await;
        assert!(drain(&mut rx).is_empty());
        assert_eq!(engine.snapshot(group).await.map(|s| s.running), Some(false));
    }

    #[tokio::test(start_paused = true)]
    async fn late_subscriber_receives_current_time_left() {
        let (engine, _hub) = engine();
        let group = Uuid::new_v4();
        engine.start_timer(group, 600).await;
        advance_secs(5).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let snapshot = engine
            .subscribe_with_replay(group, Uuid::new_v4(), tx)
            .await
            .unwrap();
        assert_eq!(snapshot.time_left, 595);

        let replay = rx.try_recv().unwrap();
        assert_eq!(replay.event, EVENT_TIMER_UPDATED);
        assert_eq!(time_left(&replay), 595);
        assert_eq!(replay.data["replay"], true);

        advance_secs(1).await;
        assert_eq!(time_left(&rx.try_recv().unwrap()), 594);
    }

    #[tokio::test(start_paused = true)]
    async fn first_tick_is_anchored_to_the_start_call() {
        let (engine, hub) = engine();
        let group = Uuid::new_v4();
        let mut rx = listen(&hub, group);

        engine.start_timer(group, 5).await;
        // The ticker task has not been polled yet when time moves on.
        tokio::time::advance(Duration::from_secs(1)).await;
        tokio::task::yield_now().await;

        let ticks: Vec<u64> = drain(&mut rx)
            .iter()
            .filter(|e| e.event == EVENT_TIMER_UPDATED)
            .map(time_left)
            .collect();
        assert_eq!(ticks, vec![4]);
    }

    #[tokio::test(start_paused = true)]
    async fn release_keeps_live_tickers() {
        let (engine, _hub) = engine();
        let group = Uuid::new_v4();
        assert!(engine.release_idle(group));

        engine.start_timer(group, 30).await;
        assert!(!engine.release_idle(group));
        assert!(engine.is_running(group));

        engine.stop_timer(group).await;
        assert!(engine.release_idle(group));
        assert_eq!(engine.snapshot(group).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_duration_expires_immediately() {
        let (engine, hub) = engine();
        let group = Uuid::new_v4();
        let mut rx = listen(&hub, group);
        engine.start_timer(group, 0).await;

        let kinds: Vec<String> = drain(&mut rx).into_iter().map(|e| e.event).collect();
        assert_eq!(kinds, vec![EVENT_TIMER_STARTED, EVENT_TIME_EXPIRED]);
        assert!(!engine.is_running(group));
    }
}
