use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::DeserializeFromStr;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use super::{
    format_system_time,
    phase::VisibleGroupPhase,
    validation::{validate_display_name, validate_values_payload},
};
use crate::dao::models::{
    GroupEntity, GroupLevelDetail, GroupWithCount, LevelDetail, MemberEntity, ThemeEntity,
};

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Payload used to create a group.
pub struct CreateGroupRequest {
    /// Display name of the group.
    #[validate(custom(function = "validate_display_name"))]
    pub name: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Payload used to join a group.
pub struct JoinGroupRequest {
    /// Joining player.
    pub player_id: Uuid,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Payload used to toggle a member's readiness.
pub struct ReadyRequest {
    /// Member whose flag changes.
    pub player_id: Uuid,
    /// New readiness value.
    pub ready: bool,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Payload used to (re)start a group's countdown.
pub struct StartTimerRequest {
    /// Countdown length in seconds.
    #[validate(range(min = 1, max = 86_400))]
    pub duration: u32,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Out-of-band timer correction.
pub struct SyncTimerRequest {
    /// Corrected remaining seconds.
    #[validate(range(max = 86_400))]
    pub time_left: u32,
    /// Player issuing the correction.
    pub player_id: Uuid,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Shared puzzle values pushed by one member.
pub struct SyncValuesRequest {
    /// Opaque JSON object forwarded to every member.
    #[validate(custom(function = "validate_values_payload"))]
    #[schema(value_type = Object)]
    pub values: Value,
    /// Player pushing the values.
    pub player_id: Uuid,
    /// Optional display name of the pushing player.
    pub player_name: Option<String>,
}

#[derive(Debug, Default, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Completion request for the current level.
pub struct CompleteRequest {
    /// Player reporting completion, if known.
    pub player_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Path)]
/// Path parameters for routes scoped to a group and a player.
pub struct GroupPlayerPath {
    /// Group identifier.
    pub id: Uuid,
    /// Player identifier.
    pub player_id: Uuid,
}

#[derive(Debug, Clone, Serialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
/// Theme as consumed by clients, including the navigation route.
pub struct ThemeSummary {
    /// Theme identifier.
    pub id: Uuid,
    /// Theme name.
    pub name: String,
    /// Client route, `/` followed by the lowercase name.
    pub route: String,
}

impl From<&ThemeEntity> for ThemeSummary {
    fn from(value: &ThemeEntity) -> Self {
        Self {
            id: value.id,
            name: value.name.clone(),
            route: format!("/{}", value.name.to_lowercase()),
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Group entry of the lobby list.
pub struct GroupSummary {
    /// Group identifier.
    pub id: Uuid,
    /// Group name.
    pub name: String,
    /// Number of members.
    pub player_count: usize,
    /// Whether the last level was finished.
    pub finished: bool,
    /// Current (or last) level of the group.
    pub current_level: Option<Uuid>,
    /// Creation timestamp (RFC 3339).
    pub created_at: String,
}

impl From<GroupWithCount> for GroupSummary {
    fn from(value: GroupWithCount) -> Self {
        GroupSummary::from_entity(&value.group, value.player_count)
    }
}

impl GroupSummary {
    /// Build a summary from a group record and its member count.
    pub fn from_entity(group: &GroupEntity, player_count: usize) -> Self {
        Self {
            id: group.id,
            name: group.name.clone(),
            player_count,
            finished: group.finished,
            current_level: group.current_level,
            created_at: format_system_time(group.created_at),
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Member entry of a group roster.
pub struct MemberSummary {
    /// Player identifier.
    pub player_id: Uuid,
    /// Player display name.
    pub name: String,
    /// Readiness flag.
    pub ready: bool,
    /// Join timestamp (RFC 3339).
    pub joined_at: String,
}

impl From<MemberEntity> for MemberSummary {
    fn from(value: MemberEntity) -> Self {
        Self {
            player_id: value.player_id,
            name: value.name,
            ready: value.ready,
            joined_at: format_system_time(value.joined_at),
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Full view of one group: record, roster and lifecycle phase.
pub struct GroupDetail {
    /// Group identifier.
    pub id: Uuid,
    /// Group name.
    pub name: String,
    /// Lifecycle phase.
    pub phase: VisibleGroupPhase,
    /// Whether the last level was finished.
    pub finished: bool,
    /// Current (or last) level of the group.
    pub current_level: Option<Uuid>,
    /// Number of members.
    pub player_count: usize,
    /// Number of ready members.
    pub ready_count: usize,
    /// Roster in join order.
    pub members: Vec<MemberSummary>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Level with its theme and the group's completion flag.
pub struct LevelSummary {
    /// Level identifier.
    pub id: Uuid,
    /// Theme the level instantiates.
    pub theme: ThemeSummary,
    /// Score required to clear the level.
    pub required_score: u32,
    /// Whether the group finished it.
    pub finished: bool,
}

impl From<GroupLevelDetail> for LevelSummary {
    fn from(value: GroupLevelDetail) -> Self {
        LevelSummary::from_detail(&value.level, value.finished)
    }
}

impl LevelSummary {
    /// Build a summary from a level joined with its theme.
    pub fn from_detail(level: &LevelDetail, finished: bool) -> Self {
        Self {
            id: level.id,
            theme: ThemeSummary::from(&level.theme),
            required_score: level.required_score,
            finished,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Level history of a group.
pub struct ProgressResponse {
    /// Group identifier.
    pub group_id: Uuid,
    /// Number of levels linked to the group.
    pub total_levels: usize,
    /// Number of finished levels.
    pub completed_levels: usize,
    /// Levels in the order they were played.
    pub levels: Vec<LevelSummary>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, DeserializeFromStr)]
/// Level addressed by a finish request: an explicit id or the group's current one.
pub enum LevelRef {
    /// The group's current level.
    Current,
    /// A specific level.
    Id(Uuid),
}

impl FromStr for LevelRef {
    type Err = uuid::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value.eq_ignore_ascii_case("current") {
            return Ok(LevelRef::Current);
        }
        Uuid::parse_str(value).map(LevelRef::Id)
    }
}
