use mongodb::bson::{DateTime, Document, doc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{MongoDaoError, MongoResult};
use crate::dao::models::{
    GroupEntity, LevelEntity, MembershipEntity, PlayerEntity, ThemeEntity,
};

// Identifiers are stored as hyphenated strings so filters built with `doc!`
// always match what serde wrote.

pub fn parse_id(value: &str) -> MongoResult<Uuid> {
    Uuid::parse_str(value).map_err(|source| MongoDaoError::CorruptId {
        value: value.to_owned(),
        source,
    })
}

pub fn doc_id(id: Uuid) -> Document {
    doc! {"_id": id.to_string()}
}

pub fn membership_key(player_id: Uuid, group_id: Uuid) -> Document {
    doc! {"player_id": player_id.to_string(), "group_id": group_id.to_string()}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoGroupDocument {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub current_level: Option<String>,
    #[serde(default)]
    pub finished: bool,
    pub timer_started_at: Option<DateTime>,
    pub timer_duration: Option<u32>,
    pub created_at: DateTime,
}

impl From<&GroupEntity> for MongoGroupDocument {
    fn from(value: &GroupEntity) -> Self {
        Self {
            id: value.id.to_string(),
            name: value.name.clone(),
            current_level: value.current_level.map(|id| id.to_string()),
            finished: value.finished,
            timer_started_at: value.timer_started_at.map(DateTime::from_system_time),
            timer_duration: value.timer_duration,
            created_at: DateTime::from_system_time(value.created_at),
        }
    }
}

impl TryFrom<MongoGroupDocument> for GroupEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoGroupDocument) -> MongoResult<Self> {
        Ok(Self {
            id: parse_id(&value.id)?,
            name: value.name,
            current_level: value.current_level.as_deref().map(parse_id).transpose()?,
            finished: value.finished,
            timer_started_at: value.timer_started_at.map(DateTime::to_system_time),
            timer_duration: value.timer_duration,
            created_at: value.created_at.to_system_time(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoPlayerDocument {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub token: String,
    pub token_expires_at: DateTime,
    pub created_at: DateTime,
}

impl From<&PlayerEntity> for MongoPlayerDocument {
    fn from(value: &PlayerEntity) -> Self {
        Self {
            id: value.id.to_string(),
            name: value.name.clone(),
            token: value.token.clone(),
            token_expires_at: DateTime::from_system_time(value.token_expires_at),
            created_at: DateTime::from_system_time(value.created_at),
        }
    }
}

impl TryFrom<MongoPlayerDocument> for PlayerEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoPlayerDocument) -> MongoResult<Self> {
        Ok(Self {
            id: parse_id(&value.id)?,
            name: value.name,
            token: value.token,
            token_expires_at: value.token_expires_at.to_system_time(),
            created_at: value.created_at.to_system_time(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoMembershipDocument {
    pub player_id: String,
    pub group_id: String,
    #[serde(default)]
    pub ready: bool,
    pub joined_at: DateTime,
}

impl From<&MembershipEntity> for MongoMembershipDocument {
    fn from(value: &MembershipEntity) -> Self {
        Self {
            player_id: value.player_id.to_string(),
            group_id: value.group_id.to_string(),
            ready: value.ready,
            joined_at: DateTime::from_system_time(value.joined_at),
        }
    }
}

impl TryFrom<MongoMembershipDocument> for MembershipEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoMembershipDocument) -> MongoResult<Self> {
        Ok(Self {
            player_id: parse_id(&value.player_id)?,
            group_id: parse_id(&value.group_id)?,
            ready: value.ready,
            joined_at: value.joined_at.to_system_time(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoThemeDocument {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
}

impl TryFrom<MongoThemeDocument> for ThemeEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoThemeDocument) -> MongoResult<Self> {
        Ok(Self {
            id: parse_id(&value.id)?,
            name: value.name,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoLevelDocument {
    #[serde(rename = "_id")]
    pub id: String,
    pub theme_id: String,
    pub required_score: u32,
}

impl From<&LevelEntity> for MongoLevelDocument {
    fn from(value: &LevelEntity) -> Self {
        Self {
            id: value.id.to_string(),
            theme_id: value.theme_id.to_string(),
            required_score: value.required_score,
        }
    }
}

impl TryFrom<MongoLevelDocument> for LevelEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoLevelDocument) -> MongoResult<Self> {
        Ok(Self {
            id: parse_id(&value.id)?,
            theme_id: parse_id(&value.theme_id)?,
            required_score: value.required_score,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoGroupLevelDocument {
    pub group_id: String,
    pub level_id: String,
    #[serde(default)]
    pub finished: bool,
    pub created_at: DateTime,
}
