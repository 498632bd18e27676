use serde::Deserialize;
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Deserialize, ToSchema)]
/// Messages accepted from WebSocket clients, tagged by `type`.
#[serde(
    tag = "type",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum InboundMessage {
    /// Observe a group topic.
    Subscribe { group_id: Uuid },
    /// Stop observing a group topic.
    Unsubscribe { group_id: Uuid },
    /// Join a group and observe its topic.
    JoinGroup { group_id: Uuid, player_id: Uuid },
    /// Leave a group and stop observing its topic.
    LeaveGroup { group_id: Uuid, player_id: Uuid },
    /// Toggle a member's readiness.
    ToggleReady {
        group_id: Uuid,
        player_id: Uuid,
        ready: bool,
    },
    /// Restart the group's countdown with an explicit duration.
    StartTimer { group_id: Uuid, duration: u32 },
    /// Advisory countdown correction.
    UpdateTimer {
        group_id: Uuid,
        time_left: u32,
        player_id: Uuid,
    },
    /// Push shared puzzle values.
    UpdateValues {
        group_id: Uuid,
        #[schema(value_type = Object)]
        values: Value,
        player_id: Uuid,
        #[serde(default)]
        player_name: Option<String>,
    },
    /// Start a session.
    StartGame { group_id: Uuid },
    /// Report completion of the current level.
    CompleteGame {
        group_id: Uuid,
        #[serde(default)]
        player_id: Option<Uuid>,
    },
}

impl InboundMessage {
    /// Parse a text frame.
    pub fn from_json_str(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Wire name of the message type, used to label error frames.
    pub fn action(&self) -> &'static str {
        match self {
            Self::Subscribe { .. } => "subscribe",
            Self::Unsubscribe { .. } => "unsubscribe",
            Self::JoinGroup { .. } => "join-group",
            Self::LeaveGroup { .. } => "leave-group",
            Self::ToggleReady { .. } => "toggle-ready",
            Self::StartTimer { .. } => "start-timer",
            Self::UpdateTimer { .. } => "update-timer",
            Self::UpdateValues { .. } => "update-values",
            Self::StartGame { .. } => "start-game",
            Self::CompleteGame { .. } => "complete-game",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_kebab_tags_with_camel_fields() {
        let group_id = Uuid::new_v4();
        let player_id = Uuid::new_v4();
        let text = format!(
            r#"{{"type":"update-timer","groupId":"{group_id}","timeLeft":42,"playerId":"{player_id}"}}"#
        );
        assert_eq!(
            InboundMessage::from_json_str(&text).unwrap(),
            InboundMessage::UpdateTimer {
                group_id,
                time_left: 42,
                player_id
            }
        );
    }

    #[test]
    fn optional_fields_default_to_none() {
        let group_id = Uuid::new_v4();
        let text = format!(r#"{{"type":"complete-game","groupId":"{group_id}"}}"#);
        let message = InboundMessage::from_json_str(&text).unwrap();
        assert_eq!(message.action(), "complete-game");
        assert_eq!(
            message,
            InboundMessage::CompleteGame {
                group_id,
                player_id: None
            }
        );
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!(InboundMessage::from_json_str(r#"{"type":"shout"}"#).is_err());
    }
}
