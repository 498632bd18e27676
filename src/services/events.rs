use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::{
    dto::{
        events::{
            GameStartedEvent, LevelCompletionEvent, RosterEvent, ServerEvent, ValuesUpdatedEvent,
        },
        group::GroupSummary,
    },
    state::AppState,
};

pub(crate) const EVENT_USER_JOINED: &str = "user-joined";
pub(crate) const EVENT_USER_LEFT: &str = "user-left";
pub(crate) const EVENT_PLAYER_READY: &str = "player-ready";
pub(crate) const EVENT_GAME_STARTED: &str = "game-started";
pub(crate) const EVENT_VALUES_UPDATED: &str = "values-updated";
pub(crate) const EVENT_LEVEL_COMPLETED: &str = "level-completed";
pub(crate) const EVENT_GAME_COMPLETED: &str = "game-completed";
pub(crate) const EVENT_ERROR: &str = "error";
const EVENT_GROUP_CREATED: &str = "group.created";
const EVENT_GROUP_UPDATED: &str = "group.updated";

/// Broadcast that a player joined the group.
pub fn broadcast_user_joined(state: &AppState, payload: &RosterEvent) {
    send_group_event(state, payload.group_id, EVENT_USER_JOINED, payload);
}

/// Broadcast that a player left the group.
pub fn broadcast_user_left(state: &AppState, payload: &RosterEvent) {
    send_group_event(state, payload.group_id, EVENT_USER_LEFT, payload);
}

/// Broadcast a readiness toggle.
pub fn broadcast_player_ready(state: &AppState, payload: &RosterEvent) {
    send_group_event(state, payload.group_id, EVENT_PLAYER_READY, payload);
}

/// Broadcast the composite session start event.
pub fn broadcast_game_started(state: &AppState, payload: &GameStartedEvent) {
    send_group_event(state, payload.group.id, EVENT_GAME_STARTED, payload);
}

/// Broadcast a level finished by id.
pub fn broadcast_level_completed(state: &AppState, payload: &LevelCompletionEvent) {
    send_group_event(state, payload.group_id, EVENT_LEVEL_COMPLETED, payload);
}

/// Broadcast completion of the current level.
pub fn broadcast_game_completed(state: &AppState, payload: &LevelCompletionEvent) {
    send_group_event(state, payload.group_id, EVENT_GAME_COMPLETED, payload);
}

/// Build the values event; shared by live pushes and replays.
pub fn values_event(payload: &ValuesUpdatedEvent) -> Option<ServerEvent> {
    encode(EVENT_VALUES_UPDATED, payload)
}

/// Announce a new group on the lobby stream.
pub fn broadcast_group_created(state: &AppState, summary: &GroupSummary) {
    send_lobby_event(state, EVENT_GROUP_CREATED, summary);
}

/// Announce a member count change on the lobby stream.
pub fn broadcast_group_updated(state: &AppState, summary: &GroupSummary) {
    send_lobby_event(state, EVENT_GROUP_UPDATED, summary);
}

pub(crate) fn encode(event: &str, payload: &impl Serialize) -> Option<ServerEvent> {
    match ServerEvent::json(event, payload) {
        Ok(event) => Some(event),
        Err(err) => {
            warn!(event, error = %err, "failed to serialize event payload");
            None
        }
    }
}

fn send_group_event(state: &AppState, group_id: Uuid, event: &str, payload: &impl Serialize) {
    if let Some(event) = encode(event, payload) {
        state.hub().publish(group_id, event);
    }
}

fn send_lobby_event(state: &AppState, event: &str, payload: &impl Serialize) {
    if let Some(event) = encode(event, payload) {
        state.lobby().broadcast(event);
    }
}
