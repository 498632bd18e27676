use dashmap::DashMap;
use indexmap::IndexMap;
use tokio::sync::{broadcast, mpsc};
use tracing::debug;
use uuid::Uuid;

use crate::dto::events::ServerEvent;

/// Identifier assigned to every push connection (WebSocket or SSE).
pub type ConnectionId = Uuid;

/// Outbound queue of one push connection.
pub type EventSender = mpsc::UnboundedSender<ServerEvent>;

/// Fan-out registry mapping each group topic to its subscribed connections.
///
/// Delivery is best effort: a connection whose queue is closed is pruned on
/// the next publish, nothing is buffered for absent connections.
#[derive(Default)]
pub struct GroupHub {
    topics: DashMap<Uuid, IndexMap<ConnectionId, EventSender>>,
}

impl GroupHub {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `connection` to the group topic. Returns false when it was already subscribed.
    pub fn subscribe(&self, group_id: Uuid, connection: ConnectionId, tx: EventSender) -> bool {
        let mut topic = self.topics.entry(group_id).or_default();
        let fresh = topic.insert(connection, tx).is_none();
        debug!(group_id = %group_id, connection = %connection, subscribers = topic.len(), "subscribed");
        fresh
    }

    /// Remove `connection` from the group topic. Safe to call when not subscribed.
    pub fn unsubscribe(&self, group_id: Uuid, connection: ConnectionId) -> bool {
        let removed = self
            .topics
            .get_mut(&group_id)
            .map(|mut topic| topic.shift_remove(&connection).is_some())
            .unwrap_or(false);
        self.topics.remove_if(&group_id, |_, topic| topic.is_empty());
        if removed {
            debug!(group_id = %group_id, connection = %connection, "unsubscribed");
        }
        removed
    }

    /// Remove `connection` from every topic, returning the groups it left.
    pub fn unsubscribe_all(&self, connection: ConnectionId) -> Vec<Uuid> {
        let mut left = Vec::new();
        for mut topic in self.topics.iter_mut() {
            if topic.shift_remove(&connection).is_some() {
                left.push(*topic.key());
            }
        }
        self.topics.retain(|_, topic| !topic.is_empty());
        left
    }

    /// Deliver `event` to every subscriber of the group, returning how many received it.
    pub fn publish(&self, group_id: Uuid, event: ServerEvent) -> usize {
        let delivered = match self.topics.get_mut(&group_id) {
            Some(mut topic) => {
                topic.retain(|_, tx| tx.send(event.clone()).is_ok());
                topic.len()
            }
            None => 0,
        };
        self.topics.remove_if(&group_id, |_, topic| topic.is_empty());
        delivered
    }

    /// Deliver `event` to one subscriber only.
    pub fn send_to(&self, group_id: Uuid, connection: ConnectionId, event: ServerEvent) -> bool {
        self.topics
            .get(&group_id)
            .and_then(|topic| topic.get(&connection).map(|tx| tx.send(event).is_ok()))
            .unwrap_or(false)
    }

    /// Whether `connection` is subscribed to the group topic.
    pub fn is_subscribed(&self, group_id: Uuid, connection: ConnectionId) -> bool {
        self.topics
            .get(&group_id)
            .is_some_and(|topic| topic.contains_key(&connection))
    }

    /// Number of live subscribers of the group.
    pub fn subscriber_count(&self, group_id: Uuid) -> usize {
        self.topics.get(&group_id).map(|t| t.len()).unwrap_or(0)
    }
}

/// Broadcast hub backing the lobby SSE stream.
pub struct SseHub {
    sender: broadcast::Sender<ServerEvent>,
}

impl SseHub {
    /// Construct a new hub backed by a Tokio broadcast channel with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Register a new subscriber that will receive subsequent events.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.sender.subscribe()
    }

    /// Send an event to all current subscribers, ignoring delivery errors.
    pub fn broadcast(&self, event: ServerEvent) {
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(kind: &str) -> ServerEvent {
        ServerEvent {
            event: kind.into(),
            data: json!({}),
        }
    }

    #[test]
    fn publish_reaches_every_subscriber_of_the_topic_only() {
        let hub = GroupHub::new();
        let (alpha, beta) = (Uuid::new_v4(), Uuid::new_v4());
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let (tx3, mut rx3) = mpsc::unbounded_channel();
        hub.subscribe(alpha, Uuid::new_v4(), tx1);
        hub.subscribe(alpha, Uuid::new_v4(), tx2);
        hub.subscribe(beta, Uuid::new_v4(), tx3);

        assert_eq!(hub.publish(alpha, event("user-joined")), 2);
        assert_eq!(rx1.try_recv().unwrap().event, "user-joined");
        assert_eq!(rx2.try_recv().unwrap().event, "user-joined");
        assert!(rx3.try_recv().is_err());
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let hub = GroupHub::new();
        let group = Uuid::new_v4();
        let connection = Uuid::new_v4();
        assert!(!hub.unsubscribe(group, connection));

        let (tx, _rx) = mpsc::unbounded_channel();
        hub.subscribe(group, connection, tx);
        assert!(hub.unsubscribe(group, connection));
        assert!(!hub.unsubscribe(group, connection));
        assert_eq!(hub.subscriber_count(group), 0);
    }

    #[test]
    fn closed_connections_are_pruned_on_publish() {
        let hub = GroupHub::new();
        let group = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        hub.subscribe(group, Uuid::new_v4(), tx);
        drop(rx);

        assert_eq!(hub.publish(group, event("timer-updated")), 0);
        assert_eq!(hub.subscriber_count(group), 0);
    }

    #[test]
    fn unsubscribe_all_leaves_every_topic() {
        let hub = GroupHub::new();
        let connection = Uuid::new_v4();
        let (tx, _rx) = mpsc::unbounded_channel();
        let groups = [Uuid::new_v4(), Uuid::new_v4()];
        for group in groups {
            hub.subscribe(group, connection, tx.clone());
        }

        let mut left = hub.unsubscribe_all(connection);
        left.sort();
        let mut expected = groups.to_vec();
        expected.sort();
        assert_eq!(left, expected);
        assert!(groups.iter().all(|g| hub.subscriber_count(*g) == 0));
    }

    #[test]
    fn send_to_targets_a_single_connection() {
        let hub = GroupHub::new();
        let group = Uuid::new_v4();
        let (target, other) = (Uuid::new_v4(), Uuid::new_v4());
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        hub.subscribe(group, target, tx1);
        hub.subscribe(group, other, tx2);

        assert!(hub.send_to(group, target, event("values-updated")));
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_err());
    }
}
