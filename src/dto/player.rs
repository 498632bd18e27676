use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use super::{format_system_time, validation::validate_display_name};
use crate::dao::models::{GroupEntity, MembershipEntity, PlayerEntity};

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Payload used to register a player.
pub struct CreatePlayerRequest {
    /// Display name of the player.
    #[validate(custom(function = "validate_display_name"))]
    pub name: String,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
/// Query string of the token verification route.
pub struct VerifyTokenQuery {
    /// Bearer token issued at player creation.
    pub token: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Newly created player, including its token.
pub struct PlayerCreated {
    /// Player identifier.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Opaque bearer token used to reconnect.
    pub token: String,
    /// Token expiry (RFC 3339).
    pub expires_at: String,
}

impl From<PlayerEntity> for PlayerCreated {
    fn from(value: PlayerEntity) -> Self {
        Self {
            id: value.id,
            name: value.name,
            token: value.token,
            expires_at: format_system_time(value.token_expires_at),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Identity resolved from a valid token.
pub struct PlayerIdentity {
    /// Player identifier.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Token expiry (RFC 3339).
    pub expires_at: String,
}

impl From<PlayerEntity> for PlayerIdentity {
    fn from(value: PlayerEntity) -> Self {
        Self {
            id: value.id,
            name: value.name,
            expires_at: format_system_time(value.token_expires_at),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// The group a player currently belongs to.
pub struct MembershipResponse {
    /// Group identifier.
    pub group_id: Uuid,
    /// Group name.
    pub group_name: String,
    /// Readiness flag.
    pub ready: bool,
    /// Join timestamp (RFC 3339).
    pub joined_at: String,
}

impl From<(MembershipEntity, GroupEntity)> for MembershipResponse {
    fn from((membership, group): (MembershipEntity, GroupEntity)) -> Self {
        Self {
            group_id: group.id,
            group_name: group.name,
            ready: membership.ready,
            joined_at: format_system_time(membership.joined_at),
        }
    }
}
