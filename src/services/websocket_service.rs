use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dto::{
        events::{ErrorEvent, ServerEvent},
        ws::InboundMessage,
    },
    error::{AppError, ServiceError},
    services::{
        events::{EVENT_ERROR, encode},
        session_service,
    },
    state::{ConnectionId, EventSender, SharedState},
};

const PARSE_ERROR_ACTION: &str = "parse";

/// Handle the full lifecycle of one WebSocket client.
pub async fn handle_socket(state: SharedState, socket: WebSocket) {
    let connection: ConnectionId = Uuid::new_v4();
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ServerEvent>();

    // Dedicated writer task keeps outbound frames flowing while we await inbound ones.
    let writer_task = tokio::spawn(async move {
        while let Some(event) = outbound_rx.recv().await {
            let payload = match serde_json::to_string(&event) {
                Ok(payload) => payload,
                Err(err) => {
                    warn!(event = %event.event, error = %err, "failed to serialize websocket frame");
                    continue;
                }
            };
            if sender.send(Message::Text(payload.into())).await.is_err() {
                break;
            }
        }
        let _ = sender.close().await;
    });

    info!(connection = %connection, "websocket connected");

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => {
                debug!(connection = %connection, payload = %text, "received websocket message");
                handle_text(&state, connection, &outbound_tx, &text).await;
            }
            Ok(Message::Close(_)) => {
                info!(connection = %connection, "websocket closed by client");
                break;
            }
            Ok(Message::Binary(_)) | Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Err(err) => {
                warn!(connection = %connection, error = %err, "websocket error");
                break;
            }
        }
    }

    session_service::disconnect(&state, connection);
    info!(connection = %connection, "websocket disconnected");
    finalize(writer_task, outbound_tx).await;
}

/// Parse one text frame and run it, answering failures with an `error` frame.
async fn handle_text(state: &SharedState, connection: ConnectionId, tx: &EventSender, text: &str) {
    match InboundMessage::from_json_str(text) {
        Ok(inbound) => {
            let action = inbound.action();
            if let Err(err) = dispatch(state, connection, tx, inbound).await {
                warn!(connection = %connection, action, error = %err, "websocket action failed");
                send_error(tx, action, err.into());
            }
        }
        Err(err) => {
            warn!(connection = %connection, error = %err, "failed to parse websocket message");
            send_error(tx, PARSE_ERROR_ACTION, AppError::BadRequest(err.to_string()));
        }
    }
}

/// Route one inbound message to its coordinator action.
async fn dispatch(
    state: &SharedState,
    connection: ConnectionId,
    tx: &EventSender,
    message: InboundMessage,
) -> Result<(), ServiceError> {
    match message {
        InboundMessage::Subscribe { group_id } => {
            session_service::subscribe(state, group_id, connection, tx.clone()).await
        }
        InboundMessage::Unsubscribe { group_id } => {
            session_service::unsubscribe(state, group_id, connection);
            Ok(())
        }
        InboundMessage::JoinGroup {
            group_id,
            player_id,
        } => {
            let was_subscribed = state.hub().is_subscribed(group_id, connection);
            session_service::subscribe(state, group_id, connection, tx.clone()).await?;
            let joined = session_service::join(state, group_id, player_id).await;
            if joined.is_err() && !was_subscribed {
                session_service::unsubscribe(state, group_id, connection);
            }
            joined.map(|_| ())
        }
        InboundMessage::LeaveGroup {
            group_id,
            player_id,
        } => {
            let result = session_service::leave(state, group_id, player_id).await;
            session_service::unsubscribe(state, group_id, connection);
            result.map(|_| ())
        }
        InboundMessage::ToggleReady {
            group_id,
            player_id,
            ready,
        } => session_service::set_ready(state, group_id, player_id, ready)
            .await
            .map(|_| ()),
        InboundMessage::StartTimer { group_id, duration } => {
            session_service::start_timer(state, group_id, duration)
                .await
                .map(|_| ())
        }
        InboundMessage::UpdateTimer {
            group_id,
            time_left,
            player_id,
        } => session_service::sync_timer(state, group_id, time_left, player_id)
            .await
            .map(|_| ()),
        InboundMessage::UpdateValues {
            group_id,
            values,
            player_id,
            player_name,
        } => session_service::sync_values(state, group_id, values, player_id, player_name)
            .await
            .map(|_| ()),
        InboundMessage::StartGame { group_id } => {
            session_service::start(state, group_id).await.map(|_| ())
        }
        InboundMessage::CompleteGame {
            group_id,
            player_id,
        } => session_service::complete(state, group_id, player_id)
            .await
            .map(|_| ()),
    }
}

/// Push an `error` frame to this connection only.
fn send_error(tx: &EventSender, action: &str, err: AppError) {
    let payload = ErrorEvent {
        action: action.to_owned(),
        status: err.status().as_u16(),
        message: err.to_string(),
    };
    if let Some(event) = encode(EVENT_ERROR, &payload) {
        let _ = tx.send(event);
    }
}

/// Ensure the writer task winds down before we return from the socket handler.
async fn finalize(writer_task: JoinHandle<()>, outbound_tx: EventSender) {
    drop(outbound_tx);
    let _ = writer_task.await;
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use serde_json::json;
    use tokio::sync::mpsc::UnboundedReceiver;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::party_store::{PartyStore, memory::InMemoryPartyStore},
        services::events::{EVENT_GAME_STARTED, EVENT_PLAYER_READY},
        state::AppState,
    };

    struct Client {
        connection: ConnectionId,
        tx: EventSender,
        rx: UnboundedReceiver<ServerEvent>,
    }

    impl Client {
        fn new() -> Self {
            let (tx, rx) = mpsc::unbounded_channel();
            Self {
                connection: Uuid::new_v4(),
                tx,
                rx,
            }
        }

        async fn send(&self, state: &SharedState, frame: serde_json::Value) {
            handle_text(state, self.connection, &self.tx, &frame.to_string()).await;
        }

        fn drain(&mut self) -> Vec<ServerEvent> {
            let mut events = Vec::new();
            while let Ok(event) = self.rx.try_recv() {
                events.push(event);
            }
            events
        }
    }

    fn count(events: &[ServerEvent], name: &str) -> usize {
        events.iter().filter(|event| event.event == name).count()
    }

    async fn setup() -> (SharedState, InMemoryPartyStore) {
        let config = AppConfig::default();
        let store = InMemoryPartyStore::with_themes(config.themes.clone());
        let state = AppState::new(config);
        state.install_party_store(Arc::new(store.clone())).await;
        (state, store)
    }

    async fn player(store: &InMemoryPartyStore, name: &str) -> Uuid {
        store
            .create_player(name.into(), Duration::from_secs(3600))
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn every_connection_sees_each_group_event_once() {
        let (state, store) = setup().await;
        let group = store.create_group("Alpha".into()).await.unwrap().id;
        let players = [player(&store, "ana").await, player(&store, "bo").await];
        let mut clients = [Client::new(), Client::new()];

        for (client, player_id) in clients.iter().zip(players) {
            client
                .send(
                    &state,
                    json!({ "type": "join-group", "groupId": group, "playerId": player_id }),
                )
                .await;
        }
        assert_eq!(state.hub().subscriber_count(group), 2);
        for client in clients.iter_mut() {
            client.drain();
        }

        for (client, player_id) in clients.iter().zip(players) {
            client
                .send(
                    &state,
                    json!({ "type": "toggle-ready", "groupId": group, "playerId": player_id, "ready": true }),
                )
                .await;
        }
        for client in clients.iter_mut() {
            assert_eq!(count(&client.drain(), EVENT_PLAYER_READY), 2);
        }

        clients[0]
            .send(&state, json!({ "type": "start-game", "groupId": group }))
            .await;
        for client in clients.iter_mut() {
            let events = client.drain();
            assert_eq!(count(&events, EVENT_GAME_STARTED), 1);
            assert_eq!(count(&events, EVENT_ERROR), 0);
        }
    }

    #[tokio::test]
    async fn failed_actions_answer_only_the_sender() {
        let (state, store) = setup().await;
        let group = store.create_group("Alpha".into()).await.unwrap().id;
        let players = [player(&store, "ana").await, player(&store, "bo").await];
        let mut clients = [Client::new(), Client::new()];
        for (client, player_id) in clients.iter().zip(players) {
            client
                .send(
                    &state,
                    json!({ "type": "join-group", "groupId": group, "playerId": player_id }),
                )
                .await;
            client
                .send(
                    &state,
                    json!({ "type": "toggle-ready", "groupId": group, "playerId": player_id, "ready": true }),
                )
                .await;
        }
        clients[0]
            .send(&state, json!({ "type": "start-game", "groupId": group }))
            .await;
        for client in clients.iter_mut() {
            client.drain();
        }

        clients[1]
            .send(&state, json!({ "type": "start-game", "groupId": group }))
            .await;

        let errors: Vec<_> = clients[1]
            .drain()
            .into_iter()
            .filter(|event| event.event == EVENT_ERROR)
            .collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].data["action"], "start-game");
        assert_eq!(errors[0].data["status"], 400);
        assert!(errors[0].data["message"].is_string());
        assert_eq!(count(&clients[0].drain(), EVENT_ERROR), 0);
    }

    #[tokio::test]
    async fn unparseable_frames_report_a_parse_error() {
        let (state, _) = setup().await;
        let mut client = Client::new();

        handle_text(&state, client.connection, &client.tx, "{ not json").await;
        client
            .send(&state, json!({ "type": "dance", "groupId": Uuid::new_v4() }))
            .await;

        let events = client.drain();
        assert_eq!(events.len(), 2);
        for event in events {
            assert_eq!(event.event, EVENT_ERROR);
            assert_eq!(event.data["action"], PARSE_ERROR_ACTION);
            assert_eq!(event.data["status"], 400);
        }
    }

    #[tokio::test]
    async fn rejected_join_does_not_leave_a_subscription_behind() {
        let (state, store) = setup().await;
        let group = store.create_group("Alpha".into()).await.unwrap().id;
        let mut client = Client::new();

        client
            .send(
                &state,
                json!({ "type": "join-group", "groupId": group, "playerId": Uuid::new_v4() }),
            )
            .await;

        let events = client.drain();
        assert_eq!(count(&events, EVENT_ERROR), 1);
        assert_eq!(events[events.len() - 1].data["action"], "join-group");
        assert!(!state.hub().is_subscribed(group, client.connection));
        assert_eq!(state.hub().subscriber_count(group), 0);
    }

    #[tokio::test]
    async fn rejected_join_keeps_an_earlier_subscription() {
        let (state, store) = setup().await;
        let group = store.create_group("Alpha".into()).await.unwrap().id;
        let mut client = Client::new();

        client
            .send(&state, json!({ "type": "subscribe", "groupId": group }))
            .await;
        client
            .send(
                &state,
                json!({ "type": "join-group", "groupId": group, "playerId": Uuid::new_v4() }),
            )
            .await;

        assert_eq!(count(&client.drain(), EVENT_ERROR), 1);
        assert!(state.hub().is_subscribed(group, client.connection));
    }
}
