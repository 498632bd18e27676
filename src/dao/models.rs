use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use uuid::Uuid;

/// Player record, including the opaque bearer token used for reconnection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerEntity {
    /// Stable identifier for the player.
    pub id: Uuid,
    /// Display name chosen by the player.
    pub name: String,
    /// Opaque bearer token issued at creation.
    pub token: String,
    /// Instant after which the token is no longer accepted.
    pub token_expires_at: SystemTime,
    /// Creation timestamp.
    pub created_at: SystemTime,
}

impl PlayerEntity {
    /// Whether the token is still valid at `now`.
    pub fn token_valid_at(&self, now: SystemTime) -> bool {
        self.token_expires_at > now
    }
}

/// Group (game) record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupEntity {
    /// Primary key of the group.
    pub id: Uuid,
    /// Display name of the group.
    pub name: String,
    /// Level currently (or most recently) played by the group.
    pub current_level: Option<Uuid>,
    /// Set once a level is finished; cleared when a new session starts.
    pub finished: bool,
    /// Durable mirror of the last timer start, for inspection only.
    pub timer_started_at: Option<SystemTime>,
    /// Durable mirror of the last timer duration in seconds.
    pub timer_duration: Option<u32>,
    /// Creation timestamp.
    pub created_at: SystemTime,
}

/// Group record paired with its membership count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupWithCount {
    /// The group itself.
    pub group: GroupEntity,
    /// Number of memberships attached to the group.
    pub player_count: usize,
}

/// Membership of a player in a group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MembershipEntity {
    /// Member player.
    pub player_id: Uuid,
    /// Joined group.
    pub group_id: Uuid,
    /// Readiness flag for the next session.
    pub ready: bool,
    /// When the membership was created.
    pub joined_at: SystemTime,
}

/// Membership joined with the player's display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberEntity {
    /// Member player.
    pub player_id: Uuid,
    /// Player display name.
    pub name: String,
    /// Readiness flag.
    pub ready: bool,
    /// When the membership was created.
    pub joined_at: SystemTime,
}

/// Static catalog entry describing a content category.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ThemeEntity {
    /// Stable identifier for the theme.
    pub id: Uuid,
    /// Human readable theme name.
    pub name: String,
}

/// Per-session instantiation of a theme.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LevelEntity {
    /// Stable identifier for the level.
    pub id: Uuid,
    /// Theme this level was created from.
    pub theme_id: Uuid,
    /// Score the group must reach to clear the level.
    pub required_score: u32,
}

/// Link row recording that a level belongs to a group's session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupLevelEntity {
    /// Owning group.
    pub group_id: Uuid,
    /// Linked level.
    pub level_id: Uuid,
    /// Whether the group finished this level.
    pub finished: bool,
    /// When the link was created.
    pub created_at: SystemTime,
}

/// Level joined with its theme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelDetail {
    /// Level identifier.
    pub id: Uuid,
    /// Theme the level instantiates.
    pub theme: ThemeEntity,
    /// Score the group must reach to clear the level.
    pub required_score: u32,
}

/// Group level link joined with the level and theme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupLevelDetail {
    /// Level and theme.
    pub level: LevelDetail,
    /// Whether the group finished this level.
    pub finished: bool,
}
