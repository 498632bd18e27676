use serde::Serialize;
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;

use super::{
    group::{GroupDetail, MemberSummary, ThemeSummary},
    phase::VisibleGroupPhase,
};

#[derive(Clone, Debug, PartialEq, Serialize)]
/// Dispatched payload carried to group subscribers and the lobby stream.
///
/// Serialised as-is for WebSocket frames; SSE uses `event` as the event name
/// and the JSON text of `data` as the data field.
pub struct ServerEvent {
    /// Event kind (e.g. `timer-updated`).
    pub event: String,
    /// JSON payload.
    pub data: Value,
}

impl ServerEvent {
    /// Convenience wrapper that serialises `payload` into the data field.
    pub fn json<T>(event: &str, payload: &T) -> serde_json::Result<Self>
    where
        T: Serialize,
    {
        Ok(Self {
            event: event.to_owned(),
            data: serde_json::to_value(payload)?,
        })
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Broadcast after a join, a leave or a readiness toggle.
pub struct RosterEvent {
    /// Group identifier.
    pub group_id: Uuid,
    /// Player whose membership changed.
    pub player_id: Uuid,
    /// New readiness of that player, for readiness toggles.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ready: Option<bool>,
    /// Number of members after the change.
    pub player_count: usize,
    /// Number of ready members after the change.
    pub ready_count: usize,
    /// Phase after the change.
    pub phase: VisibleGroupPhase,
    /// Roster after the change.
    pub members: Vec<MemberSummary>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Countdown parameters announced when a session starts.
pub struct TimerParameters {
    /// Countdown length in seconds.
    pub duration: u32,
    /// Start timestamp (RFC 3339).
    pub started_at: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Composite event broadcast once per successful session start; also the start response.
pub struct GameStartedEvent {
    /// Group after the start.
    pub group: GroupDetail,
    /// Theme chosen for the level.
    pub theme: ThemeSummary,
    /// Level created for the session.
    pub level_id: Uuid,
    /// Score the group must reach.
    pub required_score: u32,
    /// Countdown parameters.
    pub timer: TimerParameters,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Broadcast when a countdown is (re)started.
pub struct TimerStartedEvent {
    /// Group identifier.
    pub group_id: Uuid,
    /// Countdown length in seconds.
    pub duration: u32,
    /// Remaining seconds (equals the duration).
    pub time_left: u32,
    /// Start timestamp (RFC 3339).
    pub started_at: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Tick, correction or replay of a group's countdown.
pub struct TimerUpdatedEvent {
    /// Group identifier.
    pub group_id: Uuid,
    /// Remaining seconds.
    pub time_left: u32,
    /// Countdown length in seconds.
    pub duration: u32,
    /// Whether a ticker is still counting down.
    pub running: bool,
    /// Start timestamp (RFC 3339).
    pub started_at: String,
    /// Player who issued a correction; `null` for ticks.
    pub updated_by: Option<Uuid>,
    /// Set when sent to a new subscriber as a state replay.
    pub replay: bool,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Broadcast once when a countdown reaches zero.
pub struct TimeExpiredEvent {
    /// Group identifier.
    pub group_id: Uuid,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Shared puzzle values, live or replayed.
pub struct ValuesUpdatedEvent {
    /// Group identifier.
    pub group_id: Uuid,
    /// Opaque JSON object.
    #[schema(value_type = Object)]
    pub values: Value,
    /// Player who pushed the values.
    pub updated_by: Uuid,
    /// Display name of that player, if provided.
    pub player_name: Option<String>,
    /// Set when sent to a new subscriber as a state replay.
    pub replay: bool,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Broadcast when a level is finished; also the finish and complete response.
pub struct LevelCompletionEvent {
    /// Group identifier.
    pub group_id: Uuid,
    /// Finished level.
    pub level_id: Uuid,
    /// Theme of the finished level.
    pub theme: ThemeSummary,
    /// Candidate theme for the next session, if any remains.
    pub next_theme: Option<ThemeSummary>,
    /// Player who reported completion, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_by: Option<Uuid>,
    /// Phase after completion.
    pub phase: VisibleGroupPhase,
}

#[derive(Debug, Serialize, ToSchema)]
/// Sent to a single WebSocket connection whose action failed.
pub struct ErrorEvent {
    /// Inbound message type that failed.
    pub action: String,
    /// Equivalent HTTP status.
    pub status: u16,
    /// Human readable reason.
    pub message: String,
}
