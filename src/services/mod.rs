/// Lobby and group event broadcasting helpers.
pub mod events;
/// OpenAPI documentation generation.
pub mod documentation;
/// Read-side group queries and group creation.
pub mod group_service;
/// Health check service.
pub mod health_service;
/// Player registration, token verification and membership lookup.
pub mod player_service;
/// Periodic eviction of idle group sessions.
pub mod session_reaper;
/// Coordinator for every client-initiated group action.
pub mod session_service;
/// Server-Sent Events streaming service.
pub mod sse_service;
/// Storage persistence supervisor with reconnect backoff.
pub mod storage_supervisor;
/// Injectable theme selection.
pub mod theme_selector;
/// WebSocket connection and message handling service.
pub mod websocket_service;
