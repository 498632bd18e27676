use std::time::SystemTime;

use tracing::info;
use uuid::Uuid;

use crate::{
    dao::storage::StorageError,
    dto::player::{MembershipResponse, PlayerCreated, PlayerIdentity},
    error::ServiceError,
    state::SharedState,
};

/// Register a player and issue its token.
pub async fn create_player(state: &SharedState, name: String) -> Result<PlayerCreated, ServiceError> {
    let name = name.trim().to_owned();
    if name.is_empty() {
        return Err(ServiceError::InvalidInput(
            "player name must not be empty".into(),
        ));
    }

    let store = state.store().await?;
    let player = store.create_player(name, state.config().token_ttl).await?;
    info!(player_id = %player.id, "player created");
    Ok(player.into())
}

/// Resolve the identity behind a token. Unknown and expired tokens are both `NotFound`.
pub async fn verify_token(state: &SharedState, token: String) -> Result<PlayerIdentity, ServiceError> {
    let token = token.trim().to_owned();
    if token.is_empty() {
        return Err(ServiceError::InvalidInput("token must not be empty".into()));
    }

    let store = state.store().await?;
    let player = store
        .get_player_by_token(token)
        .await
        .map_err(|err| match err {
            StorageError::NotFound { .. } => unknown_token(),
            other => other.into(),
        })?;
    if !player.token_valid_at(SystemTime::now()) {
        return Err(unknown_token());
    }
    Ok(player.into())
}

fn unknown_token() -> ServiceError {
    ServiceError::NotFound("token is invalid or expired".into())
}

/// The group a player currently belongs to.
pub async fn membership(state: &SharedState, player_id: Uuid) -> Result<MembershipResponse, ServiceError> {
    let store = state.store().await?;
    store.get_player(player_id).await?;
    let Some(membership) = store.find_membership_for_player(player_id).await? else {
        return Err(ServiceError::NotFound(format!(
            "player `{player_id}` is not a member of any group"
        )));
    };
    let group = store.get_group(membership.group_id).await?;
    Ok((membership, group).into())
}
