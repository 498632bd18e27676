use tracing::info;
use uuid::Uuid;

use crate::{
    dto::group::{GroupDetail, GroupSummary, LevelSummary, MemberSummary, ProgressResponse},
    error::ServiceError,
    services::{events, session_service::group_detail},
    state::SharedState,
};

/// List every group with its member count, in creation order.
pub async fn list_groups(state: &SharedState) -> Result<Vec<GroupSummary>, ServiceError> {
    let store = state.store().await?;
    let groups = store.list_groups_with_counts().await?;
    Ok(groups.into_iter().map(GroupSummary::from).collect())
}

/// Create a group and announce it on the lobby stream.
pub async fn create_group(state: &SharedState, name: String) -> Result<GroupSummary, ServiceError> {
    let name = name.trim().to_owned();
    if name.is_empty() {
        return Err(ServiceError::InvalidInput(
            "group name must not be empty".into(),
        ));
    }

    let store = state.store().await?;
    let group = store.create_group(name).await?;
    let summary = GroupSummary::from_entity(&group, 0);
    events::broadcast_group_created(state, &summary);
    info!(group_id = %group.id, name = %group.name, "group created");
    Ok(summary)
}

/// Snapshot of one group: record, roster and phase.
pub async fn get_group(state: &SharedState, id: Uuid) -> Result<GroupDetail, ServiceError> {
    let store = state.store().await?;
    let group = store.get_group(id).await?;
    let members = store.list_members(id).await?;
    let phase = state.group_phase(id).await?;
    Ok(group_detail(&group, members, phase))
}

/// Members of a group in join order.
pub async fn list_members(state: &SharedState, id: Uuid) -> Result<Vec<MemberSummary>, ServiceError> {
    let store = state.store().await?;
    store.get_group(id).await?;
    let members = store.list_members(id).await?;
    Ok(members.into_iter().map(MemberSummary::from).collect())
}

/// Level history of a group.
pub async fn progress(state: &SharedState, id: Uuid) -> Result<ProgressResponse, ServiceError> {
    let store = state.store().await?;
    store.get_group(id).await?;
    let levels: Vec<LevelSummary> = store
        .list_group_levels(id)
        .await?
        .into_iter()
        .map(LevelSummary::from)
        .collect();
    Ok(ProgressResponse {
        group_id: id,
        total_levels: levels.len(),
        completed_levels: levels.iter().filter(|level| level.finished).count(),
        levels,
    })
}

/// The group's current (or last played) level with its theme.
pub async fn current_level(state: &SharedState, id: Uuid) -> Result<LevelSummary, ServiceError> {
    let store = state.store().await?;
    let group = store.get_group(id).await?;
    let Some(level_id) = group.current_level else {
        return Err(ServiceError::NotFound(format!(
            "group `{id}` has no current level"
        )));
    };
    let finished = store
        .list_group_levels(id)
        .await?
        .iter()
        .find(|link| link.level.id == level_id)
        .map(|link| link.finished)
        .unwrap_or(group.finished);
    let level = store.get_level(level_id).await?;
    Ok(LevelSummary::from_detail(&level, finished))
}
