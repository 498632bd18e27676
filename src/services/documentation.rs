use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI document for Escape Party Back.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::groups::list_groups,
        crate::routes::groups::create_group,
        crate::routes::groups::get_group,
        crate::routes::groups::join_group,
        crate::routes::groups::leave_group,
        crate::routes::groups::list_players,
        crate::routes::groups::set_ready,
        crate::routes::groups::start_session,
        crate::routes::groups::finish_level,
        crate::routes::groups::progress,
        crate::routes::groups::current_level,
        crate::routes::groups::start_timer,
        crate::routes::groups::sync_timer,
        crate::routes::groups::sync_values,
        crate::routes::groups::complete,
        crate::routes::players::create_player,
        crate::routes::players::verify_token,
        crate::routes::players::membership,
        crate::routes::sse::lobby_stream,
        crate::routes::sse::group_stream,
        crate::routes::websocket::ws_handler,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::phase::VisibleGroupPhase,
            crate::dto::ws::InboundMessage,
            crate::dto::events::RosterEvent,
            crate::dto::events::TimerStartedEvent,
            crate::dto::events::TimeExpiredEvent,
            crate::dto::events::ErrorEvent,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "groups", description = "Group lobby and roster"),
        (name = "sessions", description = "Session lifecycle, timer and shared values"),
        (name = "players", description = "Player identity and tokens"),
        (name = "push", description = "WebSocket and server-sent events transports"),
    )
)]
pub struct ApiDoc;
