pub mod memory;
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use std::time::{Duration, SystemTime};

use futures::future::BoxFuture;
use uuid::Uuid;

use crate::dao::models::{
    GroupEntity, GroupLevelDetail, GroupWithCount, LevelDetail, LevelEntity, MemberEntity,
    MembershipEntity, PlayerEntity, ThemeEntity,
};
use crate::dao::storage::StorageResult;

/// Abstraction over the persistence layer for players, groups, memberships and levels.
///
/// Every method returns an owned future so implementations can be shared behind
/// `Arc<dyn PartyStore>` and awaited from spawned tasks.
pub trait PartyStore: Send + Sync {
    /// Load a group; `NotFound` when absent.
    fn get_group(&self, id: Uuid) -> BoxFuture<'static, StorageResult<GroupEntity>>;
    /// List every group with its membership count, in creation order.
    fn list_groups_with_counts(&self) -> BoxFuture<'static, StorageResult<Vec<GroupWithCount>>>;
    /// Create a new group with the provided name.
    fn create_group(&self, name: String) -> BoxFuture<'static, StorageResult<GroupEntity>>;

    /// Insert a membership; `Conflict` when the pair already exists.
    fn add_membership(
        &self,
        player_id: Uuid,
        group_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<MembershipEntity>>;
    /// Delete a membership; `NotFound` when the pair does not exist.
    fn remove_membership(
        &self,
        player_id: Uuid,
        group_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<()>>;
    /// Update a member's readiness; `NotFound` when the pair does not exist.
    fn set_ready(
        &self,
        player_id: Uuid,
        group_id: Uuid,
        ready: bool,
    ) -> BoxFuture<'static, StorageResult<()>>;
    /// Clear readiness for every member of the group.
    fn reset_ready(&self, group_id: Uuid) -> BoxFuture<'static, StorageResult<()>>;
    /// Members of a group joined with their names, in join order.
    fn list_members(&self, group_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<MemberEntity>>>;
    /// Number of members of a group.
    fn count_members(&self, group_id: Uuid) -> BoxFuture<'static, StorageResult<usize>>;
    /// Number of ready members of a group.
    fn count_ready(&self, group_id: Uuid) -> BoxFuture<'static, StorageResult<usize>>;
    /// The membership held by a player, if any.
    fn find_membership_for_player(
        &self,
        player_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<MembershipEntity>>>;

    /// The static theme catalog.
    fn list_themes(&self) -> BoxFuture<'static, StorageResult<Vec<ThemeEntity>>>;
    /// Themes already instantiated as a level for this group.
    fn list_consumed_theme_ids(&self, group_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<Uuid>>>;
    /// Create a level from a theme.
    fn create_level(
        &self,
        theme_id: Uuid,
        required_score: u32,
    ) -> BoxFuture<'static, StorageResult<LevelEntity>>;
    /// Load a level joined with its theme; `NotFound` when absent.
    fn get_level(&self, level_id: Uuid) -> BoxFuture<'static, StorageResult<LevelDetail>>;
    /// Link a level to a group as unfinished.
    fn link_level(&self, group_id: Uuid, level_id: Uuid) -> BoxFuture<'static, StorageResult<()>>;
    /// Every level linked to a group, in link order.
    fn list_group_levels(
        &self,
        group_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<GroupLevelDetail>>>;
    /// Mark a linked level finished; `NotFound` when the link does not exist.
    fn mark_level_finished(
        &self,
        group_id: Uuid,
        level_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<()>>;
    /// Remove a level link; `NotFound` when the link does not exist.
    fn unlink_level(&self, group_id: Uuid, level_id: Uuid) -> BoxFuture<'static, StorageResult<()>>;
    /// Set the group's finished flag.
    fn mark_group_finished(&self, group_id: Uuid) -> BoxFuture<'static, StorageResult<()>>;
    /// Point the group at a new current level and clear its finished flag.
    fn set_current_level(
        &self,
        group_id: Uuid,
        level_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<()>>;
    /// Mirror the last timer start on the group record.
    fn record_timer(
        &self,
        group_id: Uuid,
        started_at: SystemTime,
        duration: u32,
    ) -> BoxFuture<'static, StorageResult<()>>;
    /// Write back the current level, finished flag and timer mirror of `group`.
    fn restore_group_progress(&self, group: GroupEntity) -> BoxFuture<'static, StorageResult<()>>;

    /// Create a player and issue a fresh token valid for `token_ttl`.
    fn create_player(
        &self,
        name: String,
        token_ttl: Duration,
    ) -> BoxFuture<'static, StorageResult<PlayerEntity>>;
    /// Load a player by id; `NotFound` when absent.
    fn get_player(&self, id: Uuid) -> BoxFuture<'static, StorageResult<PlayerEntity>>;
    /// Load a player by token; `NotFound` when absent.
    fn get_player_by_token(&self, token: String) -> BoxFuture<'static, StorageResult<PlayerEntity>>;

    /// Cheap round-trip proving the backend is reachable.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    /// Attempt to re-establish the backend connection.
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}

/// Generate a fresh opaque player token.
pub(crate) fn issue_token() -> String {
    Uuid::new_v4().simple().to_string()
}
