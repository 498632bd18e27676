//! Session coordinator: one entry point per client action, shared by REST,
//! WebSocket and SSE handlers.
//!
//! Every mutating action locks its group, checks preconditions against
//! storage, runs the persistence work inside a planned state machine
//! transition and only broadcasts once that work succeeded.

use std::time::SystemTime;

use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    dao::{
        models::{GroupEntity, MemberEntity},
        party_store::PartyStore,
        storage::StorageError,
    },
    dto::{
        events::{
            GameStartedEvent, LevelCompletionEvent, RosterEvent, TimerParameters,
            ValuesUpdatedEvent,
        },
        format_system_time,
        group::{GroupDetail, GroupSummary, LevelRef, MemberSummary, ThemeSummary},
    },
    error::{Conflict, ServiceError},
    services::{
        events,
        theme_selector::{choose_theme, select_unused},
    },
    state::{
        ConnectionId, EventSender, SharedState,
        group::SyncedValues,
        state_machine::{GroupEvent, GroupPhase, Roster},
        timer::TimerSnapshot,
    },
};

fn roster_of(members: &[MemberEntity]) -> Roster {
    Roster {
        members: members.len(),
        ready: members.iter().filter(|m| m.ready).count(),
    }
}

/// Assemble the client view of a group from its record, roster and phase.
pub(crate) fn group_detail(
    group: &GroupEntity,
    members: Vec<MemberEntity>,
    phase: GroupPhase,
) -> GroupDetail {
    let roster = roster_of(&members);
    GroupDetail {
        id: group.id,
        name: group.name.clone(),
        phase: phase.into(),
        finished: group.finished,
        current_level: group.current_level,
        player_count: roster.members,
        ready_count: roster.ready,
        members: members.into_iter().map(MemberSummary::from).collect(),
    }
}

fn roster_event(player_id: Uuid, ready: Option<bool>, detail: &GroupDetail) -> RosterEvent {
    RosterEvent {
        group_id: detail.id,
        player_id,
        ready,
        player_count: detail.player_count,
        ready_count: detail.ready_count,
        phase: detail.phase,
        members: detail.members.clone(),
    }
}

fn not_a_member(group_id: Uuid, player_id: Uuid) -> ServiceError {
    ServiceError::NotFound(format!(
        "player `{player_id}` is not a member of group `{group_id}`"
    ))
}

fn ensure_timer_bound(state: &SharedState, seconds: u32) -> Result<(), ServiceError> {
    let max = state.config().max_timer_secs();
    if seconds > max {
        return Err(ServiceError::InvalidInput(format!(
            "timer value {seconds}s exceeds the {max}s limit"
        )));
    }
    Ok(())
}

/// Best-effort rollback of a start whose level was linked but not fully recorded.
async fn undo_start(store: &dyn PartyStore, group: &GroupEntity, level_id: Uuid) {
    if let Err(err) = store.unlink_level(group.id, level_id).await {
        warn!(group_id = %group.id, level_id = %level_id, error = %err, "failed to unlink level of an aborted start");
    }
    restore_group(store, group).await;
}

/// Best-effort rollback of the group record to `group`.
async fn restore_group(store: &dyn PartyStore, group: &GroupEntity) {
    if let Err(err) = store.restore_group_progress(group.clone()).await {
        warn!(group_id = %group.id, error = %err, "failed to restore group progress");
    }
}

/// Add a player to a group.
pub async fn join(
    state: &SharedState,
    group_id: Uuid,
    player_id: Uuid,
) -> Result<GroupDetail, ServiceError> {
    let guard = state.lock_group(group_id).await?;
    let store = state.store().await?;
    let group = store.get_group(group_id).await?;
    let player = store.get_player(player_id).await?;
    let mut members = store.list_members(group_id).await?;

    if members.iter().any(|m| m.player_id == player_id) {
        return Err(Conflict::AlreadyMember.into());
    }
    if members.len() >= state.config().max_members {
        return Err(Conflict::GroupFull.into());
    }

    let mut next = roster_of(&members);
    next.members += 1;
    let (membership, phase) = guard
        .run_transition(GroupEvent::RosterChanged(next), || async {
            store
                .add_membership(player_id, group_id)
                .await
                .map_err(|err| match err {
                    StorageError::Conflict { .. } => ServiceError::from(Conflict::AlreadyMember),
                    other => other.into(),
                })
        })
        .await?;

    members.push(MemberEntity {
        player_id,
        name: player.name,
        ready: membership.ready,
        joined_at: membership.joined_at,
    });
    let detail = group_detail(&group, members, phase);
    events::broadcast_user_joined(state, &roster_event(player_id, None, &detail));
    events::broadcast_group_updated(
        state,
        &GroupSummary::from_entity(&group, detail.player_count),
    );
    info!(group_id = %group_id, player_id = %player_id, members = detail.player_count, "player joined");

    Ok(detail)
}

/// Remove a player from a group.
pub async fn leave(
    state: &SharedState,
    group_id: Uuid,
    player_id: Uuid,
) -> Result<GroupDetail, ServiceError> {
    let guard = state.lock_group(group_id).await?;
    let store = state.store().await?;
    let group = store.get_group(group_id).await?;
    let mut members = store.list_members(group_id).await?;

    let Some(position) = members.iter().position(|m| m.player_id == player_id) else {
        return Err(not_a_member(group_id, player_id));
    };
    members.remove(position);

    let ((), phase) = guard
        .run_transition(GroupEvent::RosterChanged(roster_of(&members)), || async {
            Ok::<_, ServiceError>(store.remove_membership(player_id, group_id).await?)
        })
        .await?;

    let detail = group_detail(&group, members, phase);
    events::broadcast_user_left(state, &roster_event(player_id, None, &detail));
    events::broadcast_group_updated(
        state,
        &GroupSummary::from_entity(&group, detail.player_count),
    );
    info!(group_id = %group_id, player_id = %player_id, members = detail.player_count, "player left");

    Ok(detail)
}

/// Set a member's readiness flag.
pub async fn set_ready(
    state: &SharedState,
    group_id: Uuid,
    player_id: Uuid,
    ready: bool,
) -> Result<GroupDetail, ServiceError> {
    let guard = state.lock_group(group_id).await?;
    let store = state.store().await?;
    let group = store.get_group(group_id).await?;
    let mut members = store.list_members(group_id).await?;

    let Some(member) = members.iter_mut().find(|m| m.player_id == player_id) else {
        return Err(not_a_member(group_id, player_id));
    };
    member.ready = ready;

    let ((), phase) = guard
        .run_transition(GroupEvent::RosterChanged(roster_of(&members)), || async {
            Ok::<_, ServiceError>(store.set_ready(player_id, group_id, ready).await?)
        })
        .await?;

    let detail = group_detail(&group, members, phase);
    events::broadcast_player_ready(state, &roster_event(player_id, Some(ready), &detail));
    info!(group_id = %group_id, player_id = %player_id, ready, ready_count = detail.ready_count, "readiness updated");

    Ok(detail)
}

/// Open a session: pick a theme, create and link its level, reset readiness
/// and start the countdown.
pub async fn start(state: &SharedState, group_id: Uuid) -> Result<GameStartedEvent, ServiceError> {
    let guard = state.lock_group(group_id).await?;
    let store = state.store().await?;
    let config = state.config();
    let group = store.get_group(group_id).await?;
    let members = store.list_members(group_id).await?;
    let roster = roster_of(&members);

    if roster.members < config.min_members {
        return Err(Conflict::InsufficientPlayers(config.min_members).into());
    }
    if !roster.all_ready() {
        return Err(Conflict::NotAllReady.into());
    }
    let levels = store.list_group_levels(group_id).await?;
    if levels.iter().any(|link| !link.finished) {
        return Err(Conflict::SessionAlreadyOpen.into());
    }
    let theme = choose_theme(store.as_ref(), group_id, state.theme_picker())
        .await?
        .ok_or(Conflict::NoThemeAvailable)?;

    guard.transition(GroupEvent::RosterChanged(roster)).await?;

    let duration = config.session_duration_secs();
    let required_score = config.required_score;
    let started_at = SystemTime::now();
    let (level, phase) = guard
        .run_transition(GroupEvent::SessionStarted, || async {
            let level = store.create_level(theme.id, required_score).await?;
            store.link_level(group_id, level.id).await?;
            let linked = async {
                store.set_current_level(group_id, level.id).await?;
                store.record_timer(group_id, started_at, duration).await?;
                store.reset_ready(group_id).await
            }
            .await;
            if let Err(err) = linked {
                undo_start(store.as_ref(), &group, level.id).await;
                return Err(ServiceError::from(err));
            }
            Ok::<_, ServiceError>(level)
        })
        .await?;

    let group = GroupEntity {
        current_level: Some(level.id),
        finished: false,
        timer_started_at: Some(started_at),
        timer_duration: Some(duration),
        ..group
    };
    let members = members
        .into_iter()
        .map(|member| MemberEntity {
            ready: false,
            ..member
        })
        .collect();
    let event = GameStartedEvent {
        group: group_detail(&group, members, phase),
        theme: ThemeSummary::from(&theme),
        level_id: level.id,
        required_score: level.required_score,
        timer: TimerParameters {
            duration,
            started_at: format_system_time(started_at),
        },
    };

    guard.session().replace_values(None, |_| {}).await;
    events::broadcast_game_started(state, &event);
    state
        .timers()
        .start_timer_at(group_id, duration, started_at)
        .await;
    events::broadcast_group_updated(
        state,
        &GroupSummary::from_entity(&group, event.group.player_count),
    );
    info!(group_id = %group_id, theme = %theme.name, level_id = %level.id, duration, "session started");

    Ok(event)
}

/// Mark a level linked to the group as finished and end the session.
///
/// Finishing by id broadcasts `level-completed`; finishing the current level
/// broadcasts `game-completed`.
pub async fn finish_level(
    state: &SharedState,
    group_id: Uuid,
    level: LevelRef,
    completed_by: Option<Uuid>,
) -> Result<LevelCompletionEvent, ServiceError> {
    let guard = state.lock_group(group_id).await?;
    let store = state.store().await?;
    let group = store.get_group(group_id).await?;
    let level_id = match level {
        LevelRef::Id(id) => id,
        LevelRef::Current => group.current_level.ok_or(Conflict::NoCurrentLevel)?,
    };

    let levels = store.list_group_levels(group_id).await?;
    let Some(link) = levels.iter().find(|link| link.level.id == level_id) else {
        return Err(ServiceError::NotFound(format!(
            "level `{level_id}` is not linked to group `{group_id}`"
        )));
    };
    if link.finished {
        if levels.iter().all(|other| other.finished) {
            state.timers().stop_timer(group_id).await;
        }
        return Err(Conflict::InvalidTransition(format!("level `{level_id}` is already finished")).into());
    }

    let catalog = store.list_themes().await?;
    let consumed: Vec<Uuid> = levels.iter().map(|link| link.level.theme.id).collect();
    let next_theme = select_unused(&catalog, &consumed, state.theme_picker());

    let player_count = store.count_members(group_id).await?;
    let finished = guard
        .run_transition(
            GroupEvent::LevelFinished {
                next_theme_available: next_theme.is_some(),
            },
            || async {
                store.mark_group_finished(group_id).await?;
                if let Err(err) = store.mark_level_finished(group_id, level_id).await {
                    restore_group(store.as_ref(), &group).await;
                    return Err(ServiceError::from(err));
                }
                Ok::<_, ServiceError>(())
            },
        )
        .await;
    let ((), phase) = match finished {
        Ok(done) => done,
        Err(err) => {
            // The machine was reseeded from storage; a level no longer open has no countdown.
            if guard.session().phase().await.is_some_and(|phase| phase != GroupPhase::Active) {
                state.timers().stop_timer(group_id).await;
            }
            return Err(err);
        }
    };

    state.timers().stop_timer(group_id).await;

    let event = LevelCompletionEvent {
        group_id,
        level_id,
        theme: ThemeSummary::from(&link.level.theme),
        next_theme: next_theme.as_ref().map(ThemeSummary::from),
        completed_by,
        phase: phase.into(),
    };
    match level {
        LevelRef::Id(_) => events::broadcast_level_completed(state, &event),
        LevelRef::Current => events::broadcast_game_completed(state, &event),
    }
    let group = GroupEntity {
        finished: true,
        ..group
    };
    events::broadcast_group_updated(state, &GroupSummary::from_entity(&group, player_count));
    info!(group_id = %group_id, level_id = %level_id, phase = ?phase, "level finished");

    Ok(event)
}

/// Complete the group's current level on behalf of `player_id`.
pub async fn complete(
    state: &SharedState,
    group_id: Uuid,
    player_id: Option<Uuid>,
) -> Result<LevelCompletionEvent, ServiceError> {
    finish_level(state, group_id, LevelRef::Current, player_id).await
}

/// Restart the group's countdown with an explicit duration.
pub async fn start_timer(
    state: &SharedState,
    group_id: Uuid,
    duration: u32,
) -> Result<TimerSnapshot, ServiceError> {
    ensure_timer_bound(state, duration)?;
    let _guard = state.lock_group(group_id).await?;
    let store = state.store().await?;
    let started_at = SystemTime::now();
    store.record_timer(group_id, started_at, duration).await?;
    Ok(state
        .timers()
        .start_timer_at(group_id, duration, started_at)
        .await)
}

/// Apply an advisory countdown correction.
pub async fn sync_timer(
    state: &SharedState,
    group_id: Uuid,
    time_left: u32,
    player_id: Uuid,
) -> Result<TimerSnapshot, ServiceError> {
    ensure_timer_bound(state, time_left)?;
    let _guard = state.lock_group(group_id).await?;
    Ok(state
        .timers()
        .update_timer(group_id, time_left, player_id)
        .await)
}

/// Store the group's shared puzzle values and push them to every subscriber.
pub async fn sync_values(
    state: &SharedState,
    group_id: Uuid,
    values: Value,
    player_id: Uuid,
    player_name: Option<String>,
) -> Result<ValuesUpdatedEvent, ServiceError> {
    if !values.is_object() {
        return Err(ServiceError::InvalidInput(
            "values must be a JSON object".into(),
        ));
    }
    let guard = state.lock_group(group_id).await?;

    let payload = ValuesUpdatedEvent {
        group_id,
        values: values.clone(),
        updated_by: player_id,
        player_name: player_name.clone(),
        replay: false,
    };
    let synced = SyncedValues {
        values,
        updated_by: player_id,
        player_name,
        updated_at: SystemTime::now(),
    };
    guard
        .session()
        .replace_values(Some(synced), |_| {
            if let Some(event) = events::values_event(&payload) {
                state.hub().publish(group_id, event);
            }
        })
        .await;

    Ok(payload)
}

/// Subscribe a push connection to a group and replay its live state to it.
pub async fn subscribe(
    state: &SharedState,
    group_id: Uuid,
    connection: ConnectionId,
    tx: EventSender,
) -> Result<(), ServiceError> {
    let guard = state.lock_group(group_id).await?;
    state
        .timers()
        .subscribe_with_replay(group_id, connection, tx)
        .await;

    if let Some(values) = guard.session().values().await {
        let replay = ValuesUpdatedEvent {
            group_id,
            values: values.values,
            updated_by: values.updated_by,
            player_name: values.player_name,
            replay: true,
        };
        if let Some(event) = events::values_event(&replay) {
            state.hub().send_to(group_id, connection, event);
        }
    }
    info!(group_id = %group_id, connection = %connection, "connection subscribed");

    Ok(())
}

/// Stop delivering a group's events to a connection. Always safe.
pub fn unsubscribe(state: &SharedState, group_id: Uuid, connection: ConnectionId) -> bool {
    state.hub().unsubscribe(group_id, connection)
}

/// Drop every subscription held by a closed connection.
pub fn disconnect(state: &SharedState, connection: ConnectionId) {
    let left = state.hub().unsubscribe_all(connection);
    if !left.is_empty() {
        info!(connection = %connection, groups = left.len(), "connection unsubscribed from all groups");
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use rand::{Rng, SeedableRng, rngs::StdRng};
    use serde_json::json;
    use tokio::sync::mpsc;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::{models::ThemeEntity, party_store::PartyStore, party_store::memory::InMemoryPartyStore},
        dto::{events::ServerEvent, phase::VisibleGroupPhase},
        services::theme_selector::FixedSequencePicker,
        state::AppState,
    };

    struct Fixture {
        state: SharedState,
        store: InMemoryPartyStore,
    }

    async fn fixture(themes: &[&str]) -> Fixture {
        let mut config = AppConfig::default();
        config.themes = themes
            .iter()
            .map(|name| ThemeEntity {
                id: Uuid::new_v4(),
                name: (*name).into(),
            })
            .collect();
        let store = InMemoryPartyStore::with_themes(config.themes.clone());
        let state = AppState::with_picker(config, Arc::new(FixedSequencePicker::new(vec![0])));
        state.install_party_store(Arc::new(store.clone())).await;
        Fixture { state, store }
    }

    impl Fixture {
        async fn group(&self, name: &str) -> Uuid {
            self.store.create_group(name.into()).await.unwrap().id
        }

        async fn player(&self, name: &str) -> Uuid {
            self.store
                .create_player(name.into(), Duration::from_secs(3600))
                .await
                .unwrap()
                .id
        }

        async fn ready_pair(&self, group: Uuid) -> (Uuid, Uuid) {
            let p1 = self.player("P1").await;
            let p2 = self.player("P2").await;
            join(&self.state, group, p1).await.unwrap();
            join(&self.state, group, p2).await.unwrap();
            set_ready(&self.state, group, p1, true).await.unwrap();
            set_ready(&self.state, group, p2, true).await.unwrap();
            (p1, p2)
        }

        fn listen(&self, group: Uuid) -> mpsc::UnboundedReceiver<ServerEvent> {
            let (tx, rx) = mpsc::unbounded_channel();
            self.state.hub().subscribe(group, Uuid::new_v4(), tx);
            rx
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    async fn advance_secs(secs: u64) {
        for _ in 0..secs {
            tokio::time::advance(Duration::from_secs(1)).await;
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn alpha_session_counts_down_to_expiry() {
        let fx = fixture(&["Pirates", "Egypt"]).await;
        let alpha = fx.group("Alpha").await;
        let p1 = fx.player("P1").await;
        let p2 = fx.player("P2").await;
        let mut rx = fx.listen(alpha);

        assert_eq!(join(&fx.state, alpha, p1).await.unwrap().player_count, 1);
        assert_eq!(join(&fx.state, alpha, p2).await.unwrap().player_count, 2);
        set_ready(&fx.state, alpha, p1, true).await.unwrap();
        let detail = set_ready(&fx.state, alpha, p2, true).await.unwrap();
        assert_eq!(detail.phase, VisibleGroupPhase::Ready);

        let started = start(&fx.state, alpha).await.unwrap();
        assert_eq!(started.theme.name, "Pirates");
        assert_eq!(started.timer.duration, 600);
        assert_eq!(started.group.phase, VisibleGroupPhase::Active);
        assert_eq!(started.group.current_level, Some(started.level_id));

        let kinds: Vec<String> = drain(&mut rx).into_iter().map(|e| e.event).collect();
        assert_eq!(
            kinds,
            vec![
                "user-joined",
                "user-joined",
                "player-ready",
                "player-ready",
                "game-started",
                "timer-started"
            ]
        );

        advance_secs(610).await;
        let events = drain(&mut rx);
        let expired_at = events
            .iter()
            .position(|e| e.event == "time-expired")
            .unwrap();
        assert_eq!(expired_at, events.len() - 1);
        let ticks = events
            .iter()
            .filter(|e| e.event == "timer-updated")
            .count();
        assert_eq!(ticks, 600);
        assert_eq!(events[expired_at - 1].data["timeLeft"], 0);
    }

    #[tokio::test]
    async fn fifth_player_is_rejected_when_full() {
        let fx = fixture(&["Pirates"]).await;
        let group = fx.group("Full").await;
        for name in ["P1", "P2", "P3", "P4"] {
            let player = fx.player(name).await;
            join(&fx.state, group, player).await.unwrap();
        }

        let late = fx.player("P5").await;
        let result = join(&fx.state, group, late).await;
        assert!(matches!(
            result,
            Err(ServiceError::Conflict(Conflict::GroupFull))
        ));
        assert_eq!(fx.store.count_members(group).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn joining_twice_is_a_conflict() {
        let fx = fixture(&["Pirates"]).await;
        let group = fx.group("Twice").await;
        let player = fx.player("P1").await;
        join(&fx.state, group, player).await.unwrap();
        assert!(matches!(
            join(&fx.state, group, player).await,
            Err(ServiceError::Conflict(Conflict::AlreadyMember))
        ));
        assert!(matches!(
            join(&fx.state, group, Uuid::new_v4()).await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn start_reports_each_failed_precondition() {
        let fx = fixture(&["Pirates", "Egypt"]).await;
        let group = fx.group("Checks").await;
        let p1 = fx.player("P1").await;
        join(&fx.state, group, p1).await.unwrap();
        set_ready(&fx.state, group, p1, true).await.unwrap();
        assert!(matches!(
            start(&fx.state, group).await,
            Err(ServiceError::Conflict(Conflict::InsufficientPlayers(2)))
        ));

        let p2 = fx.player("P2").await;
        join(&fx.state, group, p2).await.unwrap();
        assert!(matches!(
            start(&fx.state, group).await,
            Err(ServiceError::Conflict(Conflict::NotAllReady))
        ));

        set_ready(&fx.state, group, p2, true).await.unwrap();
        start(&fx.state, group).await.unwrap();

        set_ready(&fx.state, group, p1, true).await.unwrap();
        set_ready(&fx.state, group, p2, true).await.unwrap();
        assert!(matches!(
            start(&fx.state, group).await,
            Err(ServiceError::Conflict(Conflict::SessionAlreadyOpen))
        ));
    }

    #[tokio::test]
    async fn start_resets_readiness_and_opens_exactly_one_level() {
        let fx = fixture(&["Pirates", "Egypt"]).await;
        let group = fx.group("Reset").await;
        fx.ready_pair(group).await;

        let started = start(&fx.state, group).await.unwrap();
        assert!(started.group.members.iter().all(|m| !m.ready));

        let members = fx.store.list_members(group).await.unwrap();
        assert!(members.iter().all(|m| !m.ready));
        let levels = fx.store.list_group_levels(group).await.unwrap();
        assert_eq!(levels.len(), 1);
        assert!(!levels[0].finished);
        assert_eq!(levels[0].level.id, started.level_id);
    }

    #[tokio::test]
    async fn finishing_an_unlinked_level_mutates_nothing() {
        let fx = fixture(&["Pirates", "Egypt"]).await;
        let group = fx.group("Alpha").await;
        let other = fx.group("Beta").await;
        fx.ready_pair(group).await;
        let started = start(&fx.state, group).await.unwrap();

        let theme = fx.store.list_themes().await.unwrap()[1].clone();
        let foreign = fx.store.create_level(theme.id, 100).await.unwrap();
        fx.store.link_level(other, foreign.id).await.unwrap();
        let mut rx = fx.listen(group);

        for level in [LevelRef::Id(foreign.id), LevelRef::Id(Uuid::new_v4())] {
            assert!(matches!(
                finish_level(&fx.state, group, level, None).await,
                Err(ServiceError::NotFound(_))
            ));
        }

        let record = fx.store.get_group(group).await.unwrap();
        assert!(!record.finished);
        assert_eq!(record.current_level, Some(started.level_id));
        let levels = fx.store.list_group_levels(group).await.unwrap();
        assert!(levels.iter().all(|link| !link.finished));
        assert_eq!(
            fx.state.group_phase(group).await.unwrap(),
            GroupPhase::Active
        );
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn level_done_allows_another_session_with_a_fresh_theme() {
        let fx = fixture(&["Pirates", "Egypt"]).await;
        let group = fx.group("Campaign").await;
        let (p1, p2) = fx.ready_pair(group).await;
        let first = start(&fx.state, group).await.unwrap();
        let mut rx = fx.listen(group);

        let done = finish_level(&fx.state, group, LevelRef::Id(first.level_id), None)
            .await
            .unwrap();
        assert_eq!(done.phase, VisibleGroupPhase::LevelDone);
        assert_eq!(done.next_theme.as_ref().map(|t| t.name.as_str()), Some("Egypt"));
        assert!(!fx.state.timers().is_running(group));
        assert!(drain(&mut rx).iter().any(|e| e.event == "level-completed"));

        set_ready(&fx.state, group, p1, true).await.unwrap();
        set_ready(&fx.state, group, p2, true).await.unwrap();
        let second = start(&fx.state, group).await.unwrap();
        assert_eq!(second.theme.name, "Egypt");
        assert_ne!(second.level_id, first.level_id);

        let completed = complete(&fx.state, group, Some(p2)).await.unwrap();
        assert_eq!(completed.completed_by, Some(p2));
        assert_eq!(completed.next_theme, None);
        assert_eq!(completed.phase, VisibleGroupPhase::Finished);
        let completion = drain(&mut rx)
            .into_iter()
            .find(|e| e.event == "game-completed")
            .unwrap();
        assert_eq!(completion.data["completedBy"], p2.to_string());
    }

    #[tokio::test]
    async fn exhausted_catalog_blocks_the_next_start() {
        let fx = fixture(&["Pirates"]).await;
        let group = fx.group("Solo").await;
        let (p1, p2) = fx.ready_pair(group).await;
        start(&fx.state, group).await.unwrap();
        complete(&fx.state, group, None).await.unwrap();

        set_ready(&fx.state, group, p1, true).await.unwrap();
        set_ready(&fx.state, group, p2, true).await.unwrap();
        assert!(matches!(
            start(&fx.state, group).await,
            Err(ServiceError::Conflict(Conflict::NoThemeAvailable))
        ));
        assert!(matches!(
            complete(&fx.state, group, None).await,
            Err(ServiceError::Conflict(Conflict::InvalidTransition(_)))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn late_subscriber_receives_timer_and_values_replay() {
        let fx = fixture(&["Pirates"]).await;
        let group = fx.group("Replay").await;
        let (p1, _) = fx.ready_pair(group).await;
        start(&fx.state, group).await.unwrap();
        sync_values(
            &fx.state,
            group,
            json!({"lever": "up"}),
            p1,
            Some("P1".into()),
        )
        .await
        .unwrap();
        advance_secs(5).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        subscribe(&fx.state, group, Uuid::new_v4(), tx).await.unwrap();

        let timer = rx.try_recv().unwrap();
        assert_eq!(timer.event, "timer-updated");
        assert_eq!(timer.data["timeLeft"], 595);
        assert_eq!(timer.data["replay"], true);
        let values = rx.try_recv().unwrap();
        assert_eq!(values.event, "values-updated");
        assert_eq!(values.data["values"]["lever"], "up");
        assert_eq!(values.data["replay"], true);

        advance_secs(1).await;
        assert_eq!(rx.try_recv().unwrap().data["timeLeft"], 594);
    }

    #[tokio::test]
    async fn persistence_failure_broadcasts_nothing() {
        let fx = fixture(&["Pirates"]).await;
        let group = fx.group("Flaky").await;
        let p1 = fx.player("P1").await;
        join(&fx.state, group, p1).await.unwrap();
        let mut rx = fx.listen(group);

        fx.store.set_available(false);
        assert!(matches!(
            set_ready(&fx.state, group, p1, true).await,
            Err(ServiceError::Unavailable(_))
        ));
        assert!(drain(&mut rx).is_empty());

        fx.store.set_available(true);
        let detail = set_ready(&fx.state, group, p1, true).await.unwrap();
        assert_eq!(detail.ready_count, 1);
    }

    #[tokio::test]
    async fn timer_values_are_bounded() {
        let fx = fixture(&["Pirates"]).await;
        let group = fx.group("Bounds").await;
        let limit = fx.state.config().max_timer_secs();
        assert!(matches!(
            start_timer(&fx.state, group, limit + 1).await,
            Err(ServiceError::InvalidInput(_))
        ));
        assert!(matches!(
            sync_timer(&fx.state, group, limit + 1, Uuid::new_v4()).await,
            Err(ServiceError::InvalidInput(_))
        ));
        assert!(matches!(
            sync_values(&fx.state, group, json!([1, 2]), Uuid::new_v4(), None).await,
            Err(ServiceError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn random_joins_and_leaves_never_exceed_capacity() {
        let fx = fixture(&["Pirates"]).await;
        let group = fx.group("Churn").await;
        let mut players = Vec::new();
        for index in 0..7 {
            players.push(fx.player(&format!("P{index}")).await);
        }

        let mut rng = StdRng::seed_from_u64(0x5eed);
        for _ in 0..300 {
            let player = players[rng.random_range(0..players.len())];
            if rng.random_bool(0.6) {
                let _ = join(&fx.state, group, player).await;
            } else {
                let _ = leave(&fx.state, group, player).await;
            }
            assert!(fx.store.count_members(group).await.unwrap() <= 4);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_joins_fill_the_group_exactly() {
        let fx = fixture(&["Pirates"]).await;
        let group = fx.group("Rush").await;
        let mut handles = Vec::new();
        for index in 0..8 {
            let player = fx.player(&format!("P{index}")).await;
            let state = fx.state.clone();
            handles.push(tokio::spawn(async move { join(&state, group, player).await }));
        }

        let mut joined = 0;
        let mut full = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => joined += 1,
                Err(ServiceError::Conflict(Conflict::GroupFull)) => full += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!((joined, full), (4, 4));
        assert_eq!(fx.store.count_members(group).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn restarting_the_timer_keeps_one_ticker() {
        let fx = fixture(&["Pirates"]).await;
        let group = fx.group("Timer").await;
        start_timer(&fx.state, group, 30).await.unwrap();
        start_timer(&fx.state, group, 45).await.unwrap();
        assert_eq!(fx.state.timers().live_tickers(), 1);
        assert_eq!(
            fx.state.timers().snapshot(group).await.map(|s| s.time_left),
            Some(45)
        );
        let record = fx.store.get_group(group).await.unwrap();
        assert_eq!(record.timer_duration, Some(45));
    }

    async fn open_level(fx: &Fixture, group: Uuid) -> Uuid {
        fx.ready_pair(group).await;
        start(&fx.state, group).await.unwrap().level_id
    }

    async fn level_finished(fx: &Fixture, group: Uuid, level: Uuid) -> bool {
        fx.store
            .list_group_levels(group)
            .await
            .unwrap()
            .iter()
            .any(|link| link.level.id == level && link.finished)
    }

    #[tokio::test]
    async fn failed_group_flag_write_keeps_the_level_open_and_retryable() {
        let fx = fixture(&["Pirates", "Egypt"]).await;
        let group = fx.group("Flaky").await;
        let level = open_level(&fx, group).await;
        let mut rx = fx.listen(group);

        fx.store.fail_operation("mark_group_finished");
        assert!(matches!(
            complete(&fx.state, group, None).await,
            Err(ServiceError::Unavailable(_))
        ));
        assert!(!level_finished(&fx, group, level).await);
        assert_eq!(fx.state.group_phase(group).await.unwrap(), GroupPhase::Active);
        assert!(fx.state.timers().is_running(group));
        assert!(drain(&mut rx).iter().all(|e| e.event != "game-completed"));

        fx.store.restore_operation("mark_group_finished");
        let completion = complete(&fx.state, group, None).await.unwrap();
        assert_eq!(completion.phase, VisibleGroupPhase::LevelDone);
        assert!(!fx.state.timers().is_running(group));
    }

    #[tokio::test]
    async fn failed_level_write_rolls_back_the_group_flag() {
        let fx = fixture(&["Pirates", "Egypt"]).await;
        let group = fx.group("Flaky").await;
        let level = open_level(&fx, group).await;

        fx.store.fail_operation("mark_level_finished");
        assert!(finish_level(&fx.state, group, LevelRef::Id(level), None)
            .await
            .is_err());
        let record = fx.store.get_group(group).await.unwrap();
        assert!(!record.finished);
        assert_eq!(record.current_level, Some(level));
        assert_eq!(fx.state.group_phase(group).await.unwrap(), GroupPhase::Active);

        fx.store.restore_operation("mark_level_finished");
        finish_level(&fx.state, group, LevelRef::Id(level), None)
            .await
            .unwrap();
        assert!(level_finished(&fx, group, level).await);
        assert!(fx.store.get_group(group).await.unwrap().finished);
    }

    #[tokio::test]
    async fn failed_start_after_linking_unlinks_the_level() {
        let fx = fixture(&["Pirates", "Egypt"]).await;
        let group = fx.group("Flaky").await;
        fx.ready_pair(group).await;
        let mut rx = fx.listen(group);

        fx.store.fail_operation("reset_ready");
        assert!(start(&fx.state, group).await.is_err());
        assert!(fx.store.list_group_levels(group).await.unwrap().is_empty());
        let record = fx.store.get_group(group).await.unwrap();
        assert_eq!(record.current_level, None);
        assert_eq!(record.timer_duration, None);
        assert_eq!(fx.state.group_phase(group).await.unwrap(), GroupPhase::Ready);
        assert!(!fx.state.timers().is_running(group));
        assert!(drain(&mut rx).is_empty());

        fx.store.restore_operation("reset_ready");
        let started = start(&fx.state, group).await.unwrap();
        assert_eq!(started.group.phase, VisibleGroupPhase::Active);
        assert_eq!(fx.store.list_group_levels(group).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn finishing_with_an_unreadable_roster_commits_and_announces_nothing() {
        let fx = fixture(&["Pirates", "Egypt"]).await;
        let group = fx.group("Flaky").await;
        let level = open_level(&fx, group).await;
        let mut lobby = fx.state.lobby().subscribe();

        fx.store.fail_operation("count_members");
        assert!(complete(&fx.state, group, None).await.is_err());
        assert!(!level_finished(&fx, group, level).await);
        assert!(lobby.try_recv().is_err());

        fx.store.restore_operation("count_members");
        complete(&fx.state, group, None).await.unwrap();
        let update = lobby.try_recv().unwrap();
        assert_eq!(update.data["playerCount"], 2);
    }
}
