use serde::Serialize;
use utoipa::ToSchema;

/// Health response returned by the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Health status ("ok" or "degraded").
    pub status: String,
    /// Number of group sessions currently held in memory.
    pub live_sessions: usize,
}

impl HealthResponse {
    /// Build the payload from the degraded flag.
    pub fn new(degraded: bool, live_sessions: usize) -> Self {
        let status = if degraded { "degraded" } else { "ok" };
        Self {
            status: status.to_owned(),
            live_sessions,
        }
    }
}
