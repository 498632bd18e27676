use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc, Mutex as StdMutex,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, SystemTime},
};

use futures::future::BoxFuture;
use indexmap::IndexMap;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{PartyStore, issue_token};
use crate::dao::{
    models::{
        GroupEntity, GroupLevelDetail, GroupLevelEntity, GroupWithCount, LevelDetail, LevelEntity,
        MemberEntity, MembershipEntity, PlayerEntity, ThemeEntity,
    },
    storage::{StorageError, StorageResult},
};

#[derive(Debug, Error)]
#[error("in-memory store switched offline")]
struct Offline;

#[derive(Debug, Error)]
#[error("injected failure for `{0}`")]
struct FailedOperation(&'static str);

#[derive(Default)]
struct Tables {
    groups: IndexMap<Uuid, GroupEntity>,
    players: HashMap<Uuid, PlayerEntity>,
    memberships: Vec<MembershipEntity>,
    themes: Vec<ThemeEntity>,
    levels: HashMap<Uuid, LevelEntity>,
    group_levels: Vec<GroupLevelEntity>,
}

impl Tables {
    fn group_mut(&mut self, id: Uuid) -> StorageResult<&mut GroupEntity> {
        self.groups
            .get_mut(&id)
            .ok_or_else(|| StorageError::not_found("group", id))
    }

    fn membership_mut(
        &mut self,
        player_id: Uuid,
        group_id: Uuid,
    ) -> StorageResult<&mut MembershipEntity> {
        self.memberships
            .iter_mut()
            .find(|m| m.player_id == player_id && m.group_id == group_id)
            .ok_or_else(|| StorageError::NotFound {
                entity: "membership",
                id: format!("{player_id}@{group_id}"),
            })
    }

    fn members_of(&self, group_id: Uuid) -> impl Iterator<Item = &MembershipEntity> {
        self.memberships
            .iter()
            .filter(move |m| m.group_id == group_id)
    }

    fn level_detail(&self, level_id: Uuid) -> StorageResult<LevelDetail> {
        let level = self
            .levels
            .get(&level_id)
            .ok_or_else(|| StorageError::not_found("level", level_id))?;
        let theme = self
            .themes
            .iter()
            .find(|t| t.id == level.theme_id)
            .cloned()
            .ok_or_else(|| StorageError::not_found("theme", level.theme_id))?;
        Ok(LevelDetail {
            id: level.id,
            theme,
            required_score: level.required_score,
        })
    }
}

/// Process-local repository backed by maps behind a single `RwLock`.
///
/// Used when no database is configured and throughout the test suite. The
/// `set_available` switch makes every call fail with `Unavailable`, and
/// `fail_operation` does the same for one named operation, which lets tests
/// exercise the persistence-failure paths.
#[derive(Clone, Default)]
pub struct InMemoryPartyStore {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    tables: RwLock<Tables>,
    offline: AtomicBool,
    failing: StdMutex<HashSet<&'static str>>,
}

impl InMemoryPartyStore {
    /// Build a store seeded with the provided theme catalog.
    pub fn with_themes(themes: Vec<ThemeEntity>) -> Self {
        Self {
            inner: Arc::new(Inner {
                tables: RwLock::new(Tables {
                    themes,
                    ..Tables::default()
                }),
                offline: AtomicBool::new(false),
                failing: StdMutex::default(),
            }),
        }
    }

    /// Toggle simulated backend availability.
    pub fn set_available(&self, available: bool) {
        self.inner.offline.store(!available, Ordering::SeqCst);
    }

    /// Make every call to the trait method named `operation` fail with `Unavailable`.
    pub fn fail_operation(&self, operation: &'static str) {
        if let Ok(mut failing) = self.inner.failing.lock() {
            failing.insert(operation);
        }
    }

    /// Undo [`fail_operation`](Self::fail_operation).
    pub fn restore_operation(&self, operation: &'static str) {
        if let Ok(mut failing) = self.inner.failing.lock() {
            failing.remove(operation);
        }
    }

    fn check(&self) -> StorageResult<()> {
        if self.inner.offline.load(Ordering::SeqCst) {
            Err(StorageError::unavailable(
                "memory store offline".to_owned(),
                Offline,
            ))
        } else {
            Ok(())
        }
    }

    fn check_operation(&self, operation: &'static str) -> StorageResult<()> {
        self.check()?;
        let failing = self
            .inner
            .failing
            .lock()
            .map(|failing| failing.contains(operation))
            .unwrap_or(false);
        if failing {
            return Err(StorageError::unavailable(
                format!("memory store operation `{operation}` failed"),
                FailedOperation(operation),
            ));
        }
        Ok(())
    }

    fn read<T, F>(&self, operation: &'static str, f: F) -> BoxFuture<'static, StorageResult<T>>
    where
        T: Send + 'static,
        F: FnOnce(&Tables) -> StorageResult<T> + Send + 'static,
    {
        let store = self.clone();
        Box::pin(async move {
            store.check_operation(operation)?;
            let tables = store.inner.tables.read().await;
            f(&tables)
        })
    }

    fn write<T, F>(&self, operation: &'static str, f: F) -> BoxFuture<'static, StorageResult<T>>
    where
        T: Send + 'static,
        F: FnOnce(&mut Tables) -> StorageResult<T> + Send + 'static,
    {
        let store = self.clone();
        Box::pin(async move {
            store.check_operation(operation)?;
            let mut tables = store.inner.tables.write().await;
            f(&mut tables)
        })
    }
}

impl PartyStore for InMemoryPartyStore {
    fn get_group(&self, id: Uuid) -> BoxFuture<'static, StorageResult<GroupEntity>> {
        self.read("get_group", move |t| {
            t.groups
                .get(&id)
                .cloned()
                .ok_or_else(|| StorageError::not_found("group", id))
        })
    }

    fn list_groups_with_counts(&self) -> BoxFuture<'static, StorageResult<Vec<GroupWithCount>>> {
        self.read("list_groups_with_counts", |t| {
            Ok(t.groups
                .values()
                .map(|group| GroupWithCount {
                    player_count: t.members_of(group.id).count(),
                    group: group.clone(),
                })
                .collect())
        })
    }

    fn create_group(&self, name: String) -> BoxFuture<'static, StorageResult<GroupEntity>> {
        self.write("create_group", move |t| {
            let group = GroupEntity {
                id: Uuid::new_v4(),
                name,
                current_level: None,
                finished: false,
                timer_started_at: None,
                timer_duration: None,
                created_at: SystemTime::now(),
            };
            t.groups.insert(group.id, group.clone());
            Ok(group)
        })
    }

    fn add_membership(
        &self,
        player_id: Uuid,
        group_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<MembershipEntity>> {
        self.write("add_membership", move |t| {
            if t
                .memberships
                .iter()
                .any(|m| m.player_id == player_id && m.group_id == group_id)
            {
                return Err(StorageError::conflict(format!(
                    "player {player_id} already in group {group_id}"
                )));
            }
            let membership = MembershipEntity {
                player_id,
                group_id,
                ready: false,
                joined_at: SystemTime::now(),
            };
            t.memberships.push(membership.clone());
            Ok(membership)
        })
    }

    fn remove_membership(
        &self,
        player_id: Uuid,
        group_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<()>> {
        self.write("remove_membership", move |t| {
            t.membership_mut(player_id, group_id)?;
            t.memberships
                .retain(|m| !(m.player_id == player_id && m.group_id == group_id));
            Ok(())
        })
    }

    fn set_ready(
        &self,
        player_id: Uuid,
        group_id: Uuid,
        ready: bool,
    ) -> BoxFuture<'static, StorageResult<()>> {
        self.write("set_ready", move |t| {
            t.membership_mut(player_id, group_id)?.ready = ready;
            Ok(())
        })
    }

    fn reset_ready(&self, group_id: Uuid) -> BoxFuture<'static, StorageResult<()>> {
        self.write("reset_ready", move |t| {
            t.memberships
                .iter_mut()
                .filter(|m| m.group_id == group_id)
                .for_each(|m| m.ready = false);
            Ok(())
        })
    }

    fn list_members(&self, group_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<MemberEntity>>> {
        self.read("list_members", move |t| {
            t.members_of(group_id)
                .map(|m| {
                    let player = t
                        .players
                        .get(&m.player_id)
                        .ok_or_else(|| StorageError::not_found("player", m.player_id))?;
                    Ok(MemberEntity {
                        player_id: m.player_id,
                        name: player.name.clone(),
                        ready: m.ready,
                        joined_at: m.joined_at,
                    })
                })
                .collect()
        })
    }

    fn count_members(&self, group_id: Uuid) -> BoxFuture<'static, StorageResult<usize>> {
        self.read("count_members", move |t| Ok(t.members_of(group_id).count()))
    }

    fn count_ready(&self, group_id: Uuid) -> BoxFuture<'static, StorageResult<usize>> {
        self.read("count_ready", move |t| Ok(t.members_of(group_id).filter(|m| m.ready).count()))
    }

    fn find_membership_for_player(
        &self,
        player_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<MembershipEntity>>> {
        self.read("find_membership_for_player", move |t| {
            Ok(t.memberships
                .iter()
                .rev()
                .find(|m| m.player_id == player_id)
                .cloned())
        })
    }

    fn list_themes(&self) -> BoxFuture<'static, StorageResult<Vec<ThemeEntity>>> {
        self.read("list_themes", |t| Ok(t.themes.clone()))
    }

    fn list_consumed_theme_ids(&self, group_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<Uuid>>> {
        self.read("list_consumed_theme_ids", move |t| {
            Ok(t.group_levels
                .iter()
                .filter(|link| link.group_id == group_id)
                .filter_map(|link| t.levels.get(&link.level_id).map(|l| l.theme_id))
                .collect())
        })
    }

    fn create_level(
        &self,
        theme_id: Uuid,
        required_score: u32,
    ) -> BoxFuture<'static, StorageResult<LevelEntity>> {
        self.write("create_level", move |t| {
            if !t.themes.iter().any(|theme| theme.id == theme_id) {
                return Err(StorageError::not_found("theme", theme_id));
            }
            let level = LevelEntity {
                id: Uuid::new_v4(),
                theme_id,
                required_score,
            };
            t.levels.insert(level.id, level.clone());
            Ok(level)
        })
    }

    fn get_level(&self, level_id: Uuid) -> BoxFuture<'static, StorageResult<LevelDetail>> {
        self.read("get_level", move |t| t.level_detail(level_id))
    }

    fn link_level(&self, group_id: Uuid, level_id: Uuid) -> BoxFuture<'static, StorageResult<()>> {
        self.write("link_level", move |t| {
            t.group_mut(group_id)?;
            t.group_levels.push(GroupLevelEntity {
                group_id,
                level_id,
                finished: false,
                created_at: SystemTime::now(),
            });
            Ok(())
        })
    }

    fn list_group_levels(
        &self,
        group_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<GroupLevelDetail>>> {
        self.read("list_group_levels", move |t| {
            t.group_levels
                .iter()
                .filter(|link| link.group_id == group_id)
                .map(|link| {
                    Ok(GroupLevelDetail {
                        level: t.level_detail(link.level_id)?,
                        finished: link.finished,
                    })
                })
                .collect()
        })
    }

    fn mark_level_finished(
        &self,
        group_id: Uuid,
        level_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<()>> {
        self.write("mark_level_finished", move |t| {
            let link = t
                .group_levels
                .iter_mut()
                .find(|link| link.group_id == group_id && link.level_id == level_id)
                .ok_or_else(|| StorageError::NotFound {
                    entity: "group level",
                    id: format!("{level_id}@{group_id}"),
                })?;
            link.finished = true;
            Ok(())
        })
    }

    fn unlink_level(&self, group_id: Uuid, level_id: Uuid) -> BoxFuture<'static, StorageResult<()>> {
        self.write("unlink_level", move |t| {
            let before = t.group_levels.len();
            t.group_levels
                .retain(|link| !(link.group_id == group_id && link.level_id == level_id));
            if t.group_levels.len() == before {
                return Err(StorageError::NotFound {
                    entity: "group level",
                    id: format!("{level_id}@{group_id}"),
                });
            }
            Ok(())
        })
    }

    fn mark_group_finished(&self, group_id: Uuid) -> BoxFuture<'static, StorageResult<()>> {
        self.write("mark_group_finished", move |t| {
            t.group_mut(group_id)?.finished = true;
            Ok(())
        })
    }

    fn set_current_level(
        &self,
        group_id: Uuid,
        level_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<()>> {
        self.write("set_current_level", move |t| {
            let group = t.group_mut(group_id)?;
            group.current_level = Some(level_id);
            group.finished = false;
            Ok(())
        })
    }

    fn record_timer(
        &self,
        group_id: Uuid,
        started_at: SystemTime,
        duration: u32,
    ) -> BoxFuture<'static, StorageResult<()>> {
        self.write("record_timer", move |t| {
            let group = t.group_mut(group_id)?;
            group.timer_started_at = Some(started_at);
            group.timer_duration = Some(duration);
            Ok(())
        })
    }

    fn restore_group_progress(&self, snapshot: GroupEntity) -> BoxFuture<'static, StorageResult<()>> {
        self.write("restore_group_progress", move |t| {
            let group = t.group_mut(snapshot.id)?;
            group.current_level = snapshot.current_level;
            group.finished = snapshot.finished;
            group.timer_started_at = snapshot.timer_started_at;
            group.timer_duration = snapshot.timer_duration;
            Ok(())
        })
    }

    fn create_player(
        &self,
        name: String,
        token_ttl: Duration,
    ) -> BoxFuture<'static, StorageResult<PlayerEntity>> {
        self.write("create_player", move |t| {
            let now = SystemTime::now();
            let player = PlayerEntity {
                id: Uuid::new_v4(),
                name,
                token: issue_token(),
                token_expires_at: now + token_ttl,
                created_at: now,
            };
            t.players.insert(player.id, player.clone());
            Ok(player)
        })
    }

    fn get_player(&self, id: Uuid) -> BoxFuture<'static, StorageResult<PlayerEntity>> {
        self.read("get_player", move |t| {
            t.players
                .get(&id)
                .cloned()
                .ok_or_else(|| StorageError::not_found("player", id))
        })
    }

    fn get_player_by_token(&self, token: String) -> BoxFuture<'static, StorageResult<PlayerEntity>> {
        self.read("get_player_by_token", move |t| {
            t.players
                .values()
                .find(|p| p.token == token)
                .cloned()
                .ok_or(StorageError::NotFound {
                    entity: "player token",
                    id: token,
                })
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.check() })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        self.health_check()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn themes() -> Vec<ThemeEntity> {
        vec![ThemeEntity {
            id: Uuid::new_v4(),
            name: "Pirates".into(),
        }]
    }

    #[tokio::test]
    async fn duplicate_membership_is_a_conflict() {
        let store = InMemoryPartyStore::with_themes(themes());
        let group = store.create_group("Alpha".into()).await.unwrap();
        let player = store
            .create_player("P1".into(), Duration::from_secs(60))
            .await
            .unwrap();

        store.add_membership(player.id, group.id).await.unwrap();
        let err = store.add_membership(player.id, group.id).await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict { .. }));
        assert_eq!(store.count_members(group.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn consumed_themes_follow_linked_levels() {
        let catalog = themes();
        let store = InMemoryPartyStore::with_themes(catalog.clone());
        let group = store.create_group("Alpha".into()).await.unwrap();
        assert!(store.list_consumed_theme_ids(group.id).await.unwrap().is_empty());

        let level = store.create_level(catalog[0].id, 100).await.unwrap();
        store.link_level(group.id, level.id).await.unwrap();

        assert_eq!(
            store.list_consumed_theme_ids(group.id).await.unwrap(),
            vec![catalog[0].id]
        );
        let levels = store.list_group_levels(group.id).await.unwrap();
        assert_eq!(levels.len(), 1);
        assert!(!levels[0].finished);
        assert_eq!(levels[0].level.theme.name, "Pirates");
    }

    #[tokio::test]
    async fn missing_rows_are_not_found() {
        let store = InMemoryPartyStore::default();
        let id = Uuid::new_v4();
        assert!(matches!(
            store.get_group(id).await,
            Err(StorageError::NotFound { entity: "group", .. })
        ));
        assert!(matches!(
            store.remove_membership(id, id).await,
            Err(StorageError::NotFound { .. })
        ));
        assert!(matches!(
            store.mark_level_finished(id, id).await,
            Err(StorageError::NotFound { .. })
        ));
        assert!(matches!(
            store.get_player_by_token("nope".into()).await,
            Err(StorageError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn offline_switch_fails_every_call() {
        let store = InMemoryPartyStore::default();
        store.set_available(false);
        assert!(matches!(
            store.create_group("Alpha".into()).await,
            Err(StorageError::Unavailable { .. })
        ));
        assert!(store.health_check().await.is_err());

        store.set_available(true);
        assert!(store.health_check().await.is_ok());
    }
}
