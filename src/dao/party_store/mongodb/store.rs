use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, SystemTime},
};

use futures::{TryStreamExt, future::BoxFuture};
use mongodb::{
    Client, Collection, Database, IndexModel,
    bson::{DateTime, Document, doc},
    error::{Error as MongoError, ErrorKind, WriteFailure},
    options::IndexOptions,
};
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use super::{
    config::MongoConfig,
    connection::establish_connection,
    error::{MongoDaoError, MongoResult},
    models::{
        MongoGroupDocument, MongoGroupLevelDocument, MongoLevelDocument, MongoMembershipDocument,
        MongoPlayerDocument, MongoThemeDocument, doc_id, membership_key, parse_id,
    },
};
use crate::dao::{
    models::{
        GroupEntity, GroupLevelDetail, GroupWithCount, LevelDetail, LevelEntity, MemberEntity,
        MembershipEntity, PlayerEntity, ThemeEntity,
    },
    party_store::{PartyStore, issue_token},
    storage::{StorageError, StorageResult},
};

const GROUPS: &str = "groups";
const PLAYERS: &str = "players";
const MEMBERSHIPS: &str = "memberships";
const THEMES: &str = "themes";
const LEVELS: &str = "levels";
const GROUP_LEVELS: &str = "group_levels";

const DUPLICATE_KEY: i32 = 11000;

fn read(collection: &'static str) -> impl FnOnce(MongoError) -> MongoDaoError {
    move |source| MongoDaoError::Read { collection, source }
}

fn write(collection: &'static str) -> impl FnOnce(MongoError) -> MongoDaoError {
    move |source| MongoDaoError::Write { collection, source }
}

fn is_duplicate_key(err: &MongoError) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(failure)) if failure.code == DUPLICATE_KEY
    )
}

/// Repository backed by MongoDB.
#[derive(Clone)]
pub struct MongoPartyStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    config: MongoConfig,
}

struct MongoState {
    client: Client,
    database: Database,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = {
            let guard = self.state.read().await;
            guard.database.clone()
        };

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (client, database) =
            establish_connection(&self.config.options, &self.config.database_name).await?;
        let mut guard = self.state.write().await;
        guard.client = client;
        guard.database = database;
        Ok(())
    }
}

impl MongoPartyStore {
    /// Connect, ensure indexes and seed the theme catalog when it is empty.
    pub async fn connect(config: MongoConfig, seed_themes: Vec<ThemeEntity>) -> MongoResult<Self> {
        let (client, database) =
            establish_connection(&config.options, &config.database_name).await?;

        let inner = Arc::new(MongoInner {
            state: RwLock::new(MongoState { client, database }),
            config,
        });

        let store = Self { inner };
        store.ensure_indexes().await?;
        store.seed_themes(seed_themes).await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let memberships = self.memberships().await;
        let index = IndexModel::builder()
            .keys(doc! {"player_id": 1, "group_id": 1})
            .options(
                IndexOptions::builder()
                    .name(Some("membership_pair_idx".to_owned()))
                    .unique(Some(true))
                    .build(),
            )
            .build();
        memberships
            .create_index(index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: MEMBERSHIPS,
                index: "player_id,group_id",
                source,
            })?;

        let players = self.players().await;
        let index = IndexModel::builder()
            .keys(doc! {"token": 1})
            .options(
                IndexOptions::builder()
                    .name(Some("player_token_idx".to_owned()))
                    .unique(Some(true))
                    .build(),
            )
            .build();
        players
            .create_index(index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: PLAYERS,
                index: "token",
                source,
            })?;

        let links = self.group_levels().await;
        let index = IndexModel::builder()
            .keys(doc! {"group_id": 1, "level_id": 1})
            .options(
                IndexOptions::builder()
                    .name(Some("group_level_idx".to_owned()))
                    .build(),
            )
            .build();
        links
            .create_index(index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: GROUP_LEVELS,
                index: "group_id,level_id",
                source,
            })?;

        Ok(())
    }

    async fn seed_themes(&self, themes: Vec<ThemeEntity>) -> MongoResult<()> {
        let collection = self.themes().await;
        let existing = collection
            .count_documents(doc! {})
            .await
            .map_err(read(THEMES))?;
        if existing > 0 || themes.is_empty() {
            return Ok(());
        }
        let documents: Vec<MongoThemeDocument> = themes
            .into_iter()
            .map(|theme| MongoThemeDocument {
                id: theme.id.to_string(),
                name: theme.name,
            })
            .collect();
        info!(count = documents.len(), "seeding theme catalog");
        collection
            .insert_many(documents)
            .await
            .map_err(write(THEMES))?;
        Ok(())
    }

    async fn database(&self) -> Database {
        let guard = self.inner.state.read().await;
        guard.database.clone()
    }

    async fn groups(&self) -> Collection<MongoGroupDocument> {
        self.database().await.collection(GROUPS)
    }

    async fn players(&self) -> Collection<MongoPlayerDocument> {
        self.database().await.collection(PLAYERS)
    }

    async fn memberships(&self) -> Collection<MongoMembershipDocument> {
        self.database().await.collection(MEMBERSHIPS)
    }

    async fn themes(&self) -> Collection<MongoThemeDocument> {
        self.database().await.collection(THEMES)
    }

    async fn levels(&self) -> Collection<MongoLevelDocument> {
        self.database().await.collection(LEVELS)
    }

    async fn group_levels(&self) -> Collection<MongoGroupLevelDocument> {
        self.database().await.collection(GROUP_LEVELS)
    }

    async fn update_group(&self, id: Uuid, update: Document) -> StorageResult<()> {
        let result = self
            .groups()
            .await
            .update_one(doc_id(id), update)
            .await
            .map_err(write(GROUPS))?;
        if result.matched_count == 0 {
            return Err(StorageError::not_found("group", id));
        }
        Ok(())
    }

    async fn get_group(&self, id: Uuid) -> StorageResult<GroupEntity> {
        let document = self
            .groups()
            .await
            .find_one(doc_id(id))
            .await
            .map_err(read(GROUPS))?
            .ok_or_else(|| StorageError::not_found("group", id))?;
        Ok(GroupEntity::try_from(document)?)
    }

    async fn list_groups_with_counts(&self) -> StorageResult<Vec<GroupWithCount>> {
        let documents: Vec<MongoGroupDocument> = self
            .groups()
            .await
            .find(doc! {})
            .sort(doc! {"created_at": 1})
            .await
            .map_err(read(GROUPS))?
            .try_collect()
            .await
            .map_err(read(GROUPS))?;

        let counts: Vec<Document> = self
            .database()
            .await
            .collection::<Document>(MEMBERSHIPS)
            .aggregate(vec![doc! {"$group": {"_id": "$group_id", "count": {"$sum": 1}}}])
            .await
            .map_err(read(MEMBERSHIPS))?
            .try_collect()
            .await
            .map_err(read(MEMBERSHIPS))?;

        let mut by_group = HashMap::with_capacity(counts.len());
        for entry in counts {
            let (Ok(group_id), Ok(count)) = (entry.get_str("_id"), entry.get_i32("count")) else {
                return Err(MongoDaoError::MalformedAggregate {
                    collection: MEMBERSHIPS,
                }
                .into());
            };
            by_group.insert(group_id.to_owned(), usize::try_from(count).unwrap_or(0));
        }

        documents
            .into_iter()
            .map(|document| -> StorageResult<GroupWithCount> {
                let player_count = by_group.get(&document.id).copied().unwrap_or(0);
                Ok(GroupWithCount {
                    group: GroupEntity::try_from(document)?,
                    player_count,
                })
            })
            .collect()
    }

    async fn create_group(&self, name: String) -> StorageResult<GroupEntity> {
        let group = GroupEntity {
            id: Uuid::new_v4(),
            name,
            current_level: None,
            finished: false,
            timer_started_at: None,
            timer_duration: None,
            created_at: SystemTime::now(),
        };
        self.groups()
            .await
            .insert_one(MongoGroupDocument::from(&group))
            .await
            .map_err(write(GROUPS))?;
        Ok(group)
    }

    async fn add_membership(
        &self,
        player_id: Uuid,
        group_id: Uuid,
    ) -> StorageResult<MembershipEntity> {
        let membership = MembershipEntity {
            player_id,
            group_id,
            ready: false,
            joined_at: SystemTime::now(),
        };
        match self
            .memberships()
            .await
            .insert_one(MongoMembershipDocument::from(&membership))
            .await
        {
            Ok(_) => Ok(membership),
            Err(err) if is_duplicate_key(&err) => Err(StorageError::conflict(format!(
                "player {player_id} already in group {group_id}"
            ))),
            Err(err) => Err(write(MEMBERSHIPS)(err).into()),
        }
    }

    async fn remove_membership(&self, player_id: Uuid, group_id: Uuid) -> StorageResult<()> {
        let result = self
            .memberships()
            .await
            .delete_one(membership_key(player_id, group_id))
            .await
            .map_err(write(MEMBERSHIPS))?;
        if result.deleted_count == 0 {
            return Err(StorageError::NotFound {
                entity: "membership",
                id: format!("{player_id}@{group_id}"),
            });
        }
        Ok(())
    }

    async fn set_ready(&self, player_id: Uuid, group_id: Uuid, ready: bool) -> StorageResult<()> {
        let result = self
            .memberships()
            .await
            .update_one(
                membership_key(player_id, group_id),
                doc! {"$set": {"ready": ready}},
            )
            .await
            .map_err(write(MEMBERSHIPS))?;
        if result.matched_count == 0 {
            return Err(StorageError::NotFound {
                entity: "membership",
                id: format!("{player_id}@{group_id}"),
            });
        }
        Ok(())
    }

    async fn reset_ready(&self, group_id: Uuid) -> StorageResult<()> {
        self.memberships()
            .await
            .update_many(
                doc! {"group_id": group_id.to_string()},
                doc! {"$set": {"ready": false}},
            )
            .await
            .map_err(write(MEMBERSHIPS))?;
        Ok(())
    }

    async fn memberships_of(&self, group_id: Uuid) -> StorageResult<Vec<MembershipEntity>> {
        let documents: Vec<MongoMembershipDocument> = self
            .memberships()
            .await
            .find(doc! {"group_id": group_id.to_string()})
            .sort(doc! {"joined_at": 1})
            .await
            .map_err(read(MEMBERSHIPS))?
            .try_collect()
            .await
            .map_err(read(MEMBERSHIPS))?;
        documents
            .into_iter()
            .map(|document| MembershipEntity::try_from(document).map_err(StorageError::from))
            .collect()
    }

    async fn list_members(&self, group_id: Uuid) -> StorageResult<Vec<MemberEntity>> {
        let memberships = self.memberships_of(group_id).await?;
        let ids: Vec<String> = memberships
            .iter()
            .map(|m| m.player_id.to_string())
            .collect();
        let players: Vec<MongoPlayerDocument> = self
            .players()
            .await
            .find(doc! {"_id": {"$in": ids}})
            .await
            .map_err(read(PLAYERS))?
            .try_collect()
            .await
            .map_err(read(PLAYERS))?;
        let names: HashMap<String, String> = players
            .into_iter()
            .map(|player| (player.id, player.name))
            .collect();

        memberships
            .into_iter()
            .map(|m| {
                let name = names
                    .get(&m.player_id.to_string())
                    .cloned()
                    .ok_or_else(|| StorageError::not_found("player", m.player_id))?;
                Ok(MemberEntity {
                    player_id: m.player_id,
                    name,
                    ready: m.ready,
                    joined_at: m.joined_at,
                })
            })
            .collect()
    }

    async fn count_members(&self, filter: Document) -> StorageResult<usize> {
        let count = self
            .memberships()
            .await
            .count_documents(filter)
            .await
            .map_err(read(MEMBERSHIPS))?;
        Ok(usize::try_from(count).unwrap_or(usize::MAX))
    }

    async fn find_membership_for_player(
        &self,
        player_id: Uuid,
    ) -> StorageResult<Option<MembershipEntity>> {
        let document = self
            .memberships()
            .await
            .find_one(doc! {"player_id": player_id.to_string()})
            .sort(doc! {"joined_at": -1})
            .await
            .map_err(read(MEMBERSHIPS))?;
        document
            .map(MembershipEntity::try_from)
            .transpose()
            .map_err(StorageError::from)
    }

    async fn list_themes(&self) -> StorageResult<Vec<ThemeEntity>> {
        let documents: Vec<MongoThemeDocument> = self
            .themes()
            .await
            .find(doc! {})
            .sort(doc! {"name": 1})
            .await
            .map_err(read(THEMES))?
            .try_collect()
            .await
            .map_err(read(THEMES))?;
        documents
            .into_iter()
            .map(|document| ThemeEntity::try_from(document).map_err(StorageError::from))
            .collect()
    }

    async fn links_of(&self, group_id: Uuid) -> StorageResult<Vec<MongoGroupLevelDocument>> {
        let links = self
            .group_levels()
            .await
            .find(doc! {"group_id": group_id.to_string()})
            .sort(doc! {"created_at": 1})
            .await
            .map_err(read(GROUP_LEVELS))?
            .try_collect()
            .await
            .map_err(read(GROUP_LEVELS))?;
        Ok(links)
    }

    async fn levels_by_id(&self, ids: Vec<String>) -> StorageResult<HashMap<Uuid, LevelEntity>> {
        let documents: Vec<MongoLevelDocument> = self
            .levels()
            .await
            .find(doc! {"_id": {"$in": ids}})
            .await
            .map_err(read(LEVELS))?
            .try_collect()
            .await
            .map_err(read(LEVELS))?;
        documents
            .into_iter()
            .map(|document| -> StorageResult<(Uuid, LevelEntity)> {
                let level = LevelEntity::try_from(document)?;
                Ok((level.id, level))
            })
            .collect()
    }

    async fn list_consumed_theme_ids(&self, group_id: Uuid) -> StorageResult<Vec<Uuid>> {
        let links = self.links_of(group_id).await?;
        let levels = self
            .levels_by_id(links.iter().map(|l| l.level_id.clone()).collect())
            .await?;
        links
            .iter()
            .map(|link| -> StorageResult<Option<Uuid>> {
                let id = parse_id(&link.level_id)?;
                Ok(levels.get(&id).map(|level| level.theme_id))
            })
            .filter_map(Result::transpose)
            .collect()
    }

    async fn create_level(&self, theme_id: Uuid, required_score: u32) -> StorageResult<LevelEntity> {
        let theme = self
            .themes()
            .await
            .find_one(doc_id(theme_id))
            .await
            .map_err(read(THEMES))?;
        if theme.is_none() {
            return Err(StorageError::not_found("theme", theme_id));
        }
        let level = LevelEntity {
            id: Uuid::new_v4(),
            theme_id,
            required_score,
        };
        self.levels()
            .await
            .insert_one(MongoLevelDocument::from(&level))
            .await
            .map_err(write(LEVELS))?;
        Ok(level)
    }

    async fn get_level(&self, level_id: Uuid) -> StorageResult<LevelDetail> {
        let level: LevelEntity = self
            .levels()
            .await
            .find_one(doc_id(level_id))
            .await
            .map_err(read(LEVELS))?
            .ok_or_else(|| StorageError::not_found("level", level_id))?
            .try_into()?;
        let theme: ThemeEntity = self
            .themes()
            .await
            .find_one(doc_id(level.theme_id))
            .await
            .map_err(read(THEMES))?
            .ok_or_else(|| StorageError::not_found("theme", level.theme_id))?
            .try_into()?;
        Ok(LevelDetail {
            id: level.id,
            theme,
            required_score: level.required_score,
        })
    }

    async fn link_level(&self, group_id: Uuid, level_id: Uuid) -> StorageResult<()> {
        self.group_levels()
            .await
            .insert_one(MongoGroupLevelDocument {
                group_id: group_id.to_string(),
                level_id: level_id.to_string(),
                finished: false,
                created_at: DateTime::now(),
            })
            .await
            .map_err(write(GROUP_LEVELS))?;
        Ok(())
    }

    async fn list_group_levels(&self, group_id: Uuid) -> StorageResult<Vec<GroupLevelDetail>> {
        let links = self.links_of(group_id).await?;
        let mut details = Vec::with_capacity(links.len());
        for link in links {
            details.push(GroupLevelDetail {
                level: self.get_level(parse_id(&link.level_id)?).await?,
                finished: link.finished,
            });
        }
        Ok(details)
    }

    async fn mark_level_finished(&self, group_id: Uuid, level_id: Uuid) -> StorageResult<()> {
        let result = self
            .group_levels()
            .await
            .update_one(
                doc! {"group_id": group_id.to_string(), "level_id": level_id.to_string()},
                doc! {"$set": {"finished": true}},
            )
            .await
            .map_err(write(GROUP_LEVELS))?;
        if result.matched_count == 0 {
            return Err(StorageError::NotFound {
                entity: "group level",
                id: format!("{level_id}@{group_id}"),
            });
        }
        Ok(())
    }

    async fn unlink_level(&self, group_id: Uuid, level_id: Uuid) -> StorageResult<()> {
        let result = self
            .group_levels()
            .await
            .delete_one(doc! {"group_id": group_id.to_string(), "level_id": level_id.to_string()})
            .await
            .map_err(write(GROUP_LEVELS))?;
        if result.deleted_count == 0 {
            return Err(StorageError::NotFound {
                entity: "group level",
                id: format!("{level_id}@{group_id}"),
            });
        }
        Ok(())
    }

    async fn create_player(&self, name: String, token_ttl: Duration) -> StorageResult<PlayerEntity> {
        let now = SystemTime::now();
        let player = PlayerEntity {
            id: Uuid::new_v4(),
            name,
            token: issue_token(),
            token_expires_at: now + token_ttl,
            created_at: now,
        };
        self.players()
            .await
            .insert_one(MongoPlayerDocument::from(&player))
            .await
            .map_err(write(PLAYERS))?;
        Ok(player)
    }

    async fn find_player(&self, filter: Document, key: String) -> StorageResult<PlayerEntity> {
        let document = self
            .players()
            .await
            .find_one(filter)
            .await
            .map_err(read(PLAYERS))?
            .ok_or(StorageError::NotFound {
                entity: "player",
                id: key,
            })?;
        Ok(PlayerEntity::try_from(document)?)
    }
}

impl PartyStore for MongoPartyStore {
    fn get_group(&self, id: Uuid) -> BoxFuture<'static, StorageResult<GroupEntity>> {
        let store = self.clone();
        Box::pin(async move { store.get_group(id).await })
    }

    fn list_groups_with_counts(&self) -> BoxFuture<'static, StorageResult<Vec<GroupWithCount>>> {
        let store = self.clone();
        Box::pin(async move { store.list_groups_with_counts().await })
    }

    fn create_group(&self, name: String) -> BoxFuture<'static, StorageResult<GroupEntity>> {
        let store = self.clone();
        Box::pin(async move { store.create_group(name).await })
    }

    fn add_membership(
        &self,
        player_id: Uuid,
        group_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<MembershipEntity>> {
        let store = self.clone();
        Box::pin(async move { store.add_membership(player_id, group_id).await })
    }

    fn remove_membership(
        &self,
        player_id: Uuid,
        group_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.remove_membership(player_id, group_id).await })
    }

    fn set_ready(
        &self,
        player_id: Uuid,
        group_id: Uuid,
        ready: bool,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.set_ready(player_id, group_id, ready).await })
    }

    fn reset_ready(&self, group_id: Uuid) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.reset_ready(group_id).await })
    }

    fn list_members(&self, group_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<MemberEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_members(group_id).await })
    }

    fn count_members(&self, group_id: Uuid) -> BoxFuture<'static, StorageResult<usize>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .count_members(doc! {"group_id": group_id.to_string()})
                .await
        })
    }

    fn count_ready(&self, group_id: Uuid) -> BoxFuture<'static, StorageResult<usize>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .count_members(doc! {"group_id": group_id.to_string(), "ready": true})
                .await
        })
    }

    fn find_membership_for_player(
        &self,
        player_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<MembershipEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_membership_for_player(player_id).await })
    }

    fn list_themes(&self) -> BoxFuture<'static, StorageResult<Vec<ThemeEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_themes().await })
    }

    fn list_consumed_theme_ids(&self, group_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<Uuid>>> {
        let store = self.clone();
        Box::pin(async move { store.list_consumed_theme_ids(group_id).await })
    }

    fn create_level(
        &self,
        theme_id: Uuid,
        required_score: u32,
    ) -> BoxFuture<'static, StorageResult<LevelEntity>> {
        let store = self.clone();
        Box::pin(async move { store.create_level(theme_id, required_score).await })
    }

    fn get_level(&self, level_id: Uuid) -> BoxFuture<'static, StorageResult<LevelDetail>> {
        let store = self.clone();
        Box::pin(async move { store.get_level(level_id).await })
    }

    fn link_level(&self, group_id: Uuid, level_id: Uuid) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.link_level(group_id, level_id).await })
    }

    fn list_group_levels(
        &self,
        group_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<GroupLevelDetail>>> {
        let store = self.clone();
        Box::pin(async move { store.list_group_levels(group_id).await })
    }

    fn mark_level_finished(
        &self,
        group_id: Uuid,
        level_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.mark_level_finished(group_id, level_id).await })
    }

    fn unlink_level(&self, group_id: Uuid, level_id: Uuid) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.unlink_level(group_id, level_id).await })
    }

    fn mark_group_finished(&self, group_id: Uuid) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .update_group(group_id, doc! {"$set": {"finished": true}})
                .await
        })
    }

    fn set_current_level(
        &self,
        group_id: Uuid,
        level_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .update_group(
                    group_id,
                    doc! {"$set": {"current_level": level_id.to_string(), "finished": false}},
                )
                .await
        })
    }

    fn record_timer(
        &self,
        group_id: Uuid,
        started_at: SystemTime,
        duration: u32,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .update_group(
                    group_id,
                    doc! {"$set": {
                        "timer_started_at": DateTime::from_system_time(started_at),
                        "timer_duration": i64::from(duration),
                    }},
                )
                .await
        })
    }

    fn restore_group_progress(&self, group: GroupEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let document = MongoGroupDocument::from(&group);
            store
                .update_group(
                    group.id,
                    doc! {"$set": {
                        "current_level": document.current_level,
                        "finished": document.finished,
                        "timer_started_at": document.timer_started_at,
                        "timer_duration": document.timer_duration.map(i64::from),
                    }},
                )
                .await
        })
    }

    fn create_player(
        &self,
        name: String,
        token_ttl: Duration,
    ) -> BoxFuture<'static, StorageResult<PlayerEntity>> {
        let store = self.clone();
        Box::pin(async move { store.create_player(name, token_ttl).await })
    }

    fn get_player(&self, id: Uuid) -> BoxFuture<'static, StorageResult<PlayerEntity>> {
        let store = self.clone();
        Box::pin(async move { store.find_player(doc_id(id), id.to_string()).await })
    }

    fn get_player_by_token(&self, token: String) -> BoxFuture<'static, StorageResult<PlayerEntity>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_player(doc! {"token": token.clone()}, token)
                .await
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}
