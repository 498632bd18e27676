use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use uuid::Uuid;

use super::{ValidJson, ValidPath, ValidQuery};
use crate::{
    dto::player::{
        CreatePlayerRequest, MembershipResponse, PlayerCreated, PlayerIdentity, VerifyTokenQuery,
    },
    error::AppError,
    services::player_service,
    state::SharedState,
};

/// Routes handling player identity.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/players", post(create_player))
        .route("/players/verify-token", get(verify_token))
        .route("/players/{id}/membership", get(membership))
}

/// Register a player and issue a reconnection token.
#[utoipa::path(
    post,
    path = "/players",
    tag = "players",
    request_body = CreatePlayerRequest,
    responses(
        (status = 200, description = "Player created", body = PlayerCreated),
        (status = 400, description = "Invalid name")
    )
)]
pub async fn create_player(
    State(state): State<SharedState>,
    ValidJson(payload): ValidJson<CreatePlayerRequest>,
) -> Result<Json<PlayerCreated>, AppError> {
    Ok(Json(player_service::create_player(&state, payload.name).await?))
}

/// Resolve the player behind a bearer token.
#[utoipa::path(
    get,
    path = "/players/verify-token",
    tag = "players",
    params(VerifyTokenQuery),
    responses(
        (status = 200, description = "Token is valid", body = PlayerIdentity),
        (status = 404, description = "Token unknown or expired")
    )
)]
pub async fn verify_token(
    State(state): State<SharedState>,
    ValidQuery(query): ValidQuery<VerifyTokenQuery>,
) -> Result<Json<PlayerIdentity>, AppError> {
    Ok(Json(player_service::verify_token(&state, query.token).await?))
}

/// The group a player currently belongs to.
#[utoipa::path(
    get,
    path = "/players/{id}/membership",
    tag = "players",
    params(("id" = Uuid, Path, description = "Player identifier")),
    responses(
        (status = 200, description = "Current membership", body = MembershipResponse),
        (status = 404, description = "Unknown player or no membership")
    )
)]
pub async fn membership(
    State(state): State<SharedState>,
    ValidPath(id): ValidPath<Uuid>,
) -> Result<Json<MembershipResponse>, AppError> {
    Ok(Json(player_service::membership(&state, id).await?))
}
