use std::convert::Infallible;

use axum::{
    Router,
    extract::State,
    response::sse::{Event, Sse},
    routing::get,
};
use futures::Stream;
use tracing::info;
use uuid::Uuid;

use super::ValidPath;
use crate::{error::AppError, services::sse_service, state::SharedState};

#[utoipa::path(
    get,
    path = "/sse/lobby",
    tag = "push",
    responses((status = 200, description = "Lobby SSE stream", content_type = "text/event-stream", body = String))
)]
/// Stream group creation and membership count changes.
pub async fn lobby_stream(
    State(state): State<SharedState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = sse_service::subscribe_lobby(&state);
    info!("new lobby SSE connection");
    sse_service::to_sse_stream(receiver)
}

#[utoipa::path(
    get,
    path = "/sse/groups/{id}",
    tag = "push",
    params(("id" = Uuid, Path, description = "Group identifier")),
    responses(
        (status = 200, description = "Group SSE stream, starting with a state replay", content_type = "text/event-stream", body = String),
        (status = 404, description = "Unknown group")
    )
)]
/// Read-only subscription to one group's events.
pub async fn group_stream(
    State(state): State<SharedState>,
    ValidPath(id): ValidPath<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let stream = sse_service::group_stream(state, id).await?;
    info!(group_id = %id, "new group SSE connection");
    Ok(stream)
}

/// Configure the SSE endpoints.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new()
        .route("/sse/lobby", get(lobby_stream))
        .route("/sse/groups/{id}", get(group_stream))
}
