use serde::Serialize;
use utoipa::ToSchema;

use crate::state::state_machine::GroupPhase;

/// Group phase exposed to clients (REST/SSE/WebSocket).
#[derive(Debug, Serialize, ToSchema, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VisibleGroupPhase {
    /// Waiting for members or readiness.
    Forming,
    /// Everyone is ready; the session can start.
    Ready,
    /// A level is being played.
    Active,
    /// A level was completed and another theme remains.
    LevelDone,
    /// No further level can be played.
    Finished,
}

impl From<GroupPhase> for VisibleGroupPhase {
    fn from(value: GroupPhase) -> Self {
        match value {
            GroupPhase::Forming => VisibleGroupPhase::Forming,
            GroupPhase::Ready => VisibleGroupPhase::Ready,
            GroupPhase::Active => VisibleGroupPhase::Active,
            GroupPhase::LevelDone => VisibleGroupPhase::LevelDone,
            GroupPhase::Finished => VisibleGroupPhase::Finished,
        }
    }
}
