use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    routing::{delete, get, post, put},
};
use uuid::Uuid;

use super::{ValidJson, ValidPath};
use crate::{
    dto::{
        events::{GameStartedEvent, LevelCompletionEvent, TimerUpdatedEvent, ValuesUpdatedEvent},
        format_system_time,
        group::{
            CompleteRequest, CreateGroupRequest, GroupDetail, GroupPlayerPath, GroupSummary,
            JoinGroupRequest, LevelRef, LevelSummary, MemberSummary, ProgressResponse,
            ReadyRequest, StartTimerRequest, SyncTimerRequest, SyncValuesRequest,
        },
    },
    error::AppError,
    services::{group_service, session_service},
    state::{SharedState, timer::TimerSnapshot},
};

/// Routes handling groups, their roster and their sessions.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/groups", get(list_groups).post(create_group))
        .route("/groups/{id}", get(get_group))
        .route("/groups/{id}/join", post(join_group))
        .route("/groups/{id}/players", get(list_players))
        .route("/groups/{id}/players/{player_id}", delete(leave_group))
        .route("/groups/{id}/ready", post(set_ready))
        .route("/groups/{id}/start", post(start_session))
        .route("/groups/{id}/levels/{level}/finish", put(finish_level))
        .route("/groups/{id}/progress", get(progress))
        .route("/groups/{id}/current-level", get(current_level))
        .route("/groups/{id}/timer/start", post(start_timer))
        .route("/groups/{id}/sync/timer", post(sync_timer))
        .route("/groups/{id}/sync/values", post(sync_values))
        .route("/groups/{id}/complete", post(complete))
}

fn timer_response(group_id: Uuid, snapshot: TimerSnapshot, updated_by: Option<Uuid>) -> TimerUpdatedEvent {
    TimerUpdatedEvent {
        group_id,
        time_left: snapshot.time_left,
        duration: snapshot.duration,
        running: snapshot.running,
        started_at: format_system_time(snapshot.started_at),
        updated_by,
        replay: false,
    }
}

/// List every group with its member count.
#[utoipa::path(
    get,
    path = "/groups",
    tag = "groups",
    responses((status = 200, description = "Groups in creation order", body = [GroupSummary]))
)]
pub async fn list_groups(State(state): State<SharedState>) -> Result<Json<Vec<GroupSummary>>, AppError> {
    Ok(Json(group_service::list_groups(&state).await?))
}

/// Create a new group.
#[utoipa::path(
    post,
    path = "/groups",
    tag = "groups",
    request_body = CreateGroupRequest,
    responses(
        (status = 200, description = "Group created", body = GroupSummary),
        (status = 400, description = "Invalid name")
    )
)]
pub async fn create_group(
    State(state): State<SharedState>,
    ValidJson(payload): ValidJson<CreateGroupRequest>,
) -> Result<Json<GroupSummary>, AppError> {
    Ok(Json(group_service::create_group(&state, payload.name).await?))
}

/// Fetch a group snapshot with its roster and phase.
#[utoipa::path(
    get,
    path = "/groups/{id}",
    tag = "groups",
    params(("id" = Uuid, Path, description = "Group identifier")),
    responses(
        (status = 200, description = "Group snapshot", body = GroupDetail),
        (status = 404, description = "Unknown group")
    )
)]
pub async fn get_group(
    State(state): State<SharedState>,
    ValidPath(id): ValidPath<Uuid>,
) -> Result<Json<GroupDetail>, AppError> {
    Ok(Json(group_service::get_group(&state, id).await?))
}

/// Join a group.
#[utoipa::path(
    post,
    path = "/groups/{id}/join",
    tag = "groups",
    params(("id" = Uuid, Path, description = "Group identifier")),
    request_body = JoinGroupRequest,
    responses(
        (status = 200, description = "Player joined", body = GroupDetail),
        (status = 400, description = "Group full or player already a member"),
        (status = 404, description = "Unknown group or player")
    )
)]
pub async fn join_group(
    State(state): State<SharedState>,
    ValidPath(id): ValidPath<Uuid>,
    ValidJson(payload): ValidJson<JoinGroupRequest>,
) -> Result<Json<GroupDetail>, AppError> {
    Ok(Json(session_service::join(&state, id, payload.player_id).await?))
}

/// Leave a group.
#[utoipa::path(
    delete,
    path = "/groups/{id}/players/{player_id}",
    tag = "groups",
    params(GroupPlayerPath),
    responses(
        (status = 200, description = "Player left", body = GroupDetail),
        (status = 404, description = "Unknown membership")
    )
)]
pub async fn leave_group(
    State(state): State<SharedState>,
    ValidPath(path): ValidPath<GroupPlayerPath>,
) -> Result<Json<GroupDetail>, AppError> {
    Ok(Json(session_service::leave(&state, path.id, path.player_id).await?))
}

/// List the members of a group.
#[utoipa::path(
    get,
    path = "/groups/{id}/players",
    tag = "groups",
    params(("id" = Uuid, Path, description = "Group identifier")),
    responses(
        (status = 200, description = "Members in join order", body = [MemberSummary]),
        (status = 404, description = "Unknown group")
    )
)]
pub async fn list_players(
    State(state): State<SharedState>,
    ValidPath(id): ValidPath<Uuid>,
) -> Result<Json<Vec<MemberSummary>>, AppError> {
    Ok(Json(group_service::list_members(&state, id).await?))
}

/// Toggle a member's readiness.
#[utoipa::path(
    post,
    path = "/groups/{id}/ready",
    tag = "groups",
    params(("id" = Uuid, Path, description = "Group identifier")),
    request_body = ReadyRequest,
    responses(
        (status = 200, description = "Readiness updated", body = GroupDetail),
        (status = 404, description = "Unknown membership")
    )
)]
pub async fn set_ready(
    State(state): State<SharedState>,
    ValidPath(id): ValidPath<Uuid>,
    ValidJson(payload): ValidJson<ReadyRequest>,
) -> Result<Json<GroupDetail>, AppError> {
    Ok(Json(
        session_service::set_ready(&state, id, payload.player_id, payload.ready).await?,
    ))
}

/// Start a session for the group.
#[utoipa::path(
    post,
    path = "/groups/{id}/start",
    tag = "sessions",
    params(("id" = Uuid, Path, description = "Group identifier")),
    responses(
        (status = 200, description = "Session started", body = GameStartedEvent),
        (status = 400, description = "Start precondition violated"),
        (status = 404, description = "Unknown group")
    )
)]
pub async fn start_session(
    State(state): State<SharedState>,
    ValidPath(id): ValidPath<Uuid>,
) -> Result<Json<GameStartedEvent>, AppError> {
    Ok(Json(session_service::start(&state, id).await?))
}

/// Finish a level by id, or the current one with `current`.
#[utoipa::path(
    put,
    path = "/groups/{id}/levels/{level}/finish",
    tag = "sessions",
    params(
        ("id" = Uuid, Path, description = "Group identifier"),
        ("level" = String, Path, description = "Level identifier or `current`")
    ),
    responses(
        (status = 200, description = "Level finished", body = LevelCompletionEvent),
        (status = 400, description = "No open level"),
        (status = 404, description = "Level not linked to the group")
    )
)]
pub async fn finish_level(
    State(state): State<SharedState>,
    ValidPath((id, level)): ValidPath<(Uuid, LevelRef)>,
) -> Result<Json<LevelCompletionEvent>, AppError> {
    Ok(Json(
        session_service::finish_level(&state, id, level, None).await?,
    ))
}

/// Level history of the group.
#[utoipa::path(
    get,
    path = "/groups/{id}/progress",
    tag = "sessions",
    params(("id" = Uuid, Path, description = "Group identifier")),
    responses(
        (status = 200, description = "Progress", body = ProgressResponse),
        (status = 404, description = "Unknown group")
    )
)]
pub async fn progress(
    State(state): State<SharedState>,
    ValidPath(id): ValidPath<Uuid>,
) -> Result<Json<ProgressResponse>, AppError> {
    Ok(Json(group_service::progress(&state, id).await?))
}

/// Current level of the group with its theme.
#[utoipa::path(
    get,
    path = "/groups/{id}/current-level",
    tag = "sessions",
    params(("id" = Uuid, Path, description = "Group identifier")),
    responses(
        (status = 200, description = "Current level", body = LevelSummary),
        (status = 404, description = "Unknown group or no level played yet")
    )
)]
pub async fn current_level(
    State(state): State<SharedState>,
    ValidPath(id): ValidPath<Uuid>,
) -> Result<Json<LevelSummary>, AppError> {
    Ok(Json(group_service::current_level(&state, id).await?))
}

/// Restart the group's countdown.
#[utoipa::path(
    post,
    path = "/groups/{id}/timer/start",
    tag = "sessions",
    params(("id" = Uuid, Path, description = "Group identifier")),
    request_body = StartTimerRequest,
    responses(
        (status = 200, description = "Timer started", body = TimerUpdatedEvent),
        (status = 404, description = "Unknown group")
    )
)]
pub async fn start_timer(
    State(state): State<SharedState>,
    ValidPath(id): ValidPath<Uuid>,
    ValidJson(payload): ValidJson<StartTimerRequest>,
) -> Result<Json<TimerUpdatedEvent>, AppError> {
    let snapshot = session_service::start_timer(&state, id, payload.duration).await?;
    Ok(Json(timer_response(id, snapshot, None)))
}

/// Correct the group's countdown.
#[utoipa::path(
    post,
    path = "/groups/{id}/sync/timer",
    tag = "sessions",
    params(("id" = Uuid, Path, description = "Group identifier")),
    request_body = SyncTimerRequest,
    responses(
        (status = 200, description = "Timer corrected", body = TimerUpdatedEvent),
        (status = 404, description = "Unknown group")
    )
)]
pub async fn sync_timer(
    State(state): State<SharedState>,
    ValidPath(id): ValidPath<Uuid>,
    ValidJson(payload): ValidJson<SyncTimerRequest>,
) -> Result<Json<TimerUpdatedEvent>, AppError> {
    let snapshot =
        session_service::sync_timer(&state, id, payload.time_left, payload.player_id).await?;
    Ok(Json(timer_response(id, snapshot, Some(payload.player_id))))
}

/// Share puzzle values with the group.
#[utoipa::path(
    post,
    path = "/groups/{id}/sync/values",
    tag = "sessions",
    params(("id" = Uuid, Path, description = "Group identifier")),
    request_body = SyncValuesRequest,
    responses(
        (status = 200, description = "Values broadcast", body = ValuesUpdatedEvent),
        (status = 400, description = "Values are not a JSON object"),
        (status = 404, description = "Unknown group")
    )
)]
pub async fn sync_values(
    State(state): State<SharedState>,
    ValidPath(id): ValidPath<Uuid>,
    ValidJson(payload): ValidJson<SyncValuesRequest>,
) -> Result<Json<ValuesUpdatedEvent>, AppError> {
    let SyncValuesRequest {
        values,
        player_id,
        player_name,
    } = payload;
    Ok(Json(
        session_service::sync_values(&state, id, values, player_id, player_name).await?,
    ))
}

/// Complete the current level. The body is optional.
#[utoipa::path(
    post,
    path = "/groups/{id}/complete",
    tag = "sessions",
    params(("id" = Uuid, Path, description = "Group identifier")),
    request_body(content = CompleteRequest, description = "Optional completing player"),
    responses(
        (status = 200, description = "Level completed", body = LevelCompletionEvent),
        (status = 400, description = "No open level"),
        (status = 404, description = "Unknown group")
    )
)]
pub async fn complete(
    State(state): State<SharedState>,
    ValidPath(id): ValidPath<Uuid>,
    body: Bytes,
) -> Result<Json<LevelCompletionEvent>, AppError> {
    let request: CompleteRequest = if body.iter().all(u8::is_ascii_whitespace) {
        CompleteRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|err| AppError::BadRequest(err.to_string()))?
    };
    Ok(Json(
        session_service::complete(&state, id, request.player_id).await?,
    ))
}
