use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event, KeepAlive, KeepAliveStream, Sse};
use futures::Stream;
use tokio::sync::{
    broadcast::{self, error::RecvError},
    mpsc,
};
use tokio_stream::wrappers::ReceiverStream;
use tracing::info;
use uuid::Uuid;

use crate::{
    dto::events::ServerEvent,
    error::ServiceError,
    services::session_service,
    state::SharedState,
};

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

fn to_event(payload: ServerEvent) -> Event {
    Event::default()
        .event(payload.event)
        .data(payload.data.to_string())
}

fn with_keep_alive<S>(stream: S) -> Sse<KeepAliveStream<S>>
where
    S: Stream<Item = Result<Event, Infallible>> + Send + 'static,
{
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(KEEP_ALIVE_INTERVAL)
            .text("keep-alive"),
    )
}

/// Subscribe to the lobby stream.
pub fn subscribe_lobby(state: &SharedState) -> broadcast::Receiver<ServerEvent> {
    state.lobby().subscribe()
}

/// Convert a broadcast receiver into an SSE response, forwarding events until
/// the client disconnects.
pub fn to_sse_stream(
    mut receiver: broadcast::Receiver<ServerEvent>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // small bounded channel between forwarder and response
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(8);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tx.closed() => break,
                recv_result = receiver.recv() => {
                    match recv_result {
                        Ok(payload) => {
                            if tx.send(Ok(to_event(payload))).await.is_err() {
                                break;
                            }
                        }
                        Err(RecvError::Closed) => break,
                        Err(RecvError::Lagged(_)) => continue,
                    }
                }
            }
        }
        info!("lobby SSE stream disconnected");
    });

    with_keep_alive(ReceiverStream::new(rx))
}

/// Subscribe a fresh SSE connection to a group topic, replaying its live state first.
pub async fn group_stream(
    state: SharedState,
    group_id: Uuid,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ServiceError> {
    let connection = Uuid::new_v4();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<ServerEvent>();
    session_service::subscribe(&state, group_id, connection, event_tx).await?;

    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(8);
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tx.closed() => break,
                next = event_rx.recv() => {
                    let Some(payload) = next else { break };
                    if tx.send(Ok(to_event(payload))).await.is_err() {
                        break;
                    }
                }
            }
        }
        session_service::unsubscribe(&state, group_id, connection);
        info!(group_id = %group_id, connection = %connection, "group SSE stream disconnected");
    });

    Ok(with_keep_alive(ReceiverStream::new(rx)))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{body::Body, response::IntoResponse};
    use http_body_util::BodyExt;
    use serde_json::json;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::party_store::{PartyStore, memory::InMemoryPartyStore},
        state::AppState,
    };

    async fn first_frame(body: Body) -> String {
        let mut body = body;
        let frame = tokio::time::timeout(Duration::from_secs(1), body.frame())
            .await
            .expect("no frame in time")
            .expect("stream ended")
            .expect("body error");
        String::from_utf8(frame.into_data().unwrap().to_vec()).unwrap()
    }

    #[tokio::test]
    async fn group_stream_opens_with_the_timer_replay() {
        let config = AppConfig::default();
        let store = InMemoryPartyStore::with_themes(config.themes.clone());
        let state = AppState::new(config);
        state.install_party_store(Arc::new(store.clone())).await;
        let group = store.create_group("Alpha".into()).await.unwrap().id;
        session_service::start_timer(&state, group, 300).await.unwrap();

        let sse = group_stream(state.clone(), group).await.unwrap();
        let text = first_frame(sse.into_response().into_body()).await;

        assert!(text.contains("event: timer-updated"), "{text}");
        assert!(text.contains("\"replay\":true"), "{text}");
        assert_eq!(state.hub().subscriber_count(group), 1);
    }

    #[tokio::test]
    async fn unknown_group_has_no_stream() {
        let state = AppState::new(AppConfig::default());
        state
            .install_party_store(Arc::new(InMemoryPartyStore::default()))
            .await;
        assert!(group_stream(state, Uuid::new_v4()).await.is_err());
    }

    #[tokio::test]
    async fn lobby_stream_forwards_broadcasts() {
        let state = AppState::new(AppConfig::default());
        let sse = to_sse_stream(subscribe_lobby(&state));
        let event = ServerEvent {
            event: "group.created".into(),
            data: json!({ "name": "Alpha" }),
        };
        state.lobby().broadcast(event);

        let text = first_frame(sse.into_response().into_body()).await;
        assert!(text.contains("event: group.created"), "{text}");
        assert!(text.contains("\"name\":\"Alpha\""), "{text}");
    }
}
