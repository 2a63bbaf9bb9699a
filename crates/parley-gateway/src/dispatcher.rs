use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast, mpsc};
use tracing::error;
use uuid::Uuid;

use parley_types::events::GatewayEvent;

/// A broadcast event, serialized once and shared by every connection.
#[derive(Debug, Clone)]
pub struct BroadcastMessage {
    /// Set for channel-scoped events; only subscribed connections forward them.
    pub channel_id: Option<Uuid>,
    pub json: Arc<str>,
}

struct ConnectionEntry {
    user_id: Uuid,
    tx: mpsc::UnboundedSender<Arc<str>>,
    channels: HashSet<Uuid>,
}

/// Manages all connected clients and routes events to them.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    broadcast_tx: broadcast::Sender<BroadcastMessage>,

    /// Online users: user_id -> display name
    online_users: RwLock<HashMap<Uuid, String>>,

    /// Live connections: conn_id -> entry. A user may hold several.
    connections: RwLock<HashMap<Uuid, ConnectionEntry>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                online_users: RwLock::new(HashMap::new()),
                connections: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to broadcast events.
    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastMessage> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Broadcast an event to every connection (channel-scoped events are
    /// filtered per connection by its subscriptions).
    pub fn broadcast(&self, event: GatewayEvent) {
        let Some(json) = encode(&event) else { return };
        let _ = self.inner.broadcast_tx.send(BroadcastMessage {
            channel_id: event.channel_id(),
            json,
        });
    }

    /// Send an event to every connection of each listed user. Duplicate ids are sent once.
    pub async fn send_to_users(&self, user_ids: &[Uuid], event: GatewayEvent) {
        let Some(json) = encode(&event) else { return };
        let targets: HashSet<Uuid> = user_ids.iter().copied().collect();
        let connections = self.inner.connections.read().await;
        for entry in connections.values() {
            if targets.contains(&entry.user_id) {
                let _ = entry.tx.send(json.clone());
            }
        }
    }

    /// Register a new connection for `user_id`. The user goes online (and a
    /// presence update is broadcast) only if this is their first connection.
    pub async fn connect(
        &self,
        user_id: Uuid,
        display_name: String,
    ) -> (Uuid, mpsc::UnboundedReceiver<Arc<str>>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.connections.write().await.insert(
            conn_id,
            ConnectionEntry {
                user_id,
                tx,
                channels: HashSet::new(),
            },
        );

        let first = self
            .inner
            .online_users
            .write()
            .await
            .insert(user_id, display_name.clone())
            .is_none();

        if first {
            self.broadcast(GatewayEvent::PresenceUpdate {
                user_id,
                display_name,
                online: true,
            });
        }

        (conn_id, rx)
    }

    /// Drop a connection. The user goes offline when their last connection closes.
    pub async fn disconnect(&self, user_id: Uuid, conn_id: Uuid) {
        let still_connected = {
            let mut connections = self.inner.connections.write().await;
            connections.remove(&conn_id);
            connections.values().any(|c| c.user_id == user_id)
        };

        if still_connected {
            return;
        }

        let display_name = self.inner.online_users.write().await.remove(&user_id);
        if let Some(display_name) = display_name {
            self.broadcast(GatewayEvent::PresenceUpdate {
                user_id,
                display_name,
                online: false,
            });
        }
    }

    /// Replace the channel subscriptions of one connection.
    pub async fn set_subscriptions(&self, conn_id: Uuid, channel_ids: HashSet<Uuid>) {
        if let Some(entry) = self.inner.connections.write().await.get_mut(&conn_id) {
            entry.channels = channel_ids;
        }
    }

    pub async fn is_subscribed(&self, conn_id: Uuid, channel_id: Uuid) -> bool {
        self.inner
            .connections
            .read()
            .await
            .get(&conn_id)
            .is_some_and(|entry| entry.channels.contains(&channel_id))
    }

    /// Stop delivering a channel's events, to one user (left the channel) or
    /// to everyone (channel deleted).
    pub async fn revoke_channel(&self, channel_id: Uuid, user_id: Option<Uuid>) {
        let mut connections = self.inner.connections.write().await;
        for entry in connections.values_mut() {
            if user_id.is_none_or(|uid| uid == entry.user_id) {
                entry.channels.remove(&channel_id);
            }
        }
    }

    /// Online users as (user_id, display name).
    pub async fn online_users(&self) -> Vec<(Uuid, String)> {
        self.inner
            .online_users
            .read()
            .await
            .iter()
            .map(|(id, name)| (*id, name.clone()))
            .collect()
    }
}

fn encode(event: &GatewayEvent) -> Option<Arc<str>> {
    match serde_json::to_string(event) {
        Ok(json) => Some(json.into()),
        Err(e) => {
            error!("Failed to encode {} event: {}", event.kind(), e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn presence_follows_first_and_last_connection() {
        let dispatcher = Dispatcher::new();
        let mut events = dispatcher.subscribe();
        let user = Uuid::new_v4();

        let (first, _rx1) = dispatcher.connect(user, "ana".into()).await;
        let (second, _rx2) = dispatcher.connect(user, "ana".into()).await;

        let online = events.recv().await.unwrap();
        assert!(online.json.contains("\"online\":true"));
        assert!(events.try_recv().is_err(), "second connection must not re-announce");

        dispatcher.disconnect(user, first).await;
        assert!(events.try_recv().is_err());
        assert_eq!(dispatcher.online_users().await.len(), 1);

        dispatcher.disconnect(user, second).await;
        let offline = events.recv().await.unwrap();
        assert!(offline.json.contains("\"online\":false"));
        assert!(dispatcher.online_users().await.is_empty());
    }

    #[tokio::test]
    async fn targeted_events_reach_every_connection_of_the_user() {
        let dispatcher = Dispatcher::new();
        let user = Uuid::new_v4();
        let other = Uuid::new_v4();

        let (_, mut rx1) = dispatcher.connect(user, "ana".into()).await;
        let (_, mut rx2) = dispatcher.connect(user, "ana".into()).await;
        let (_, mut rx_other) = dispatcher.connect(other, "bo".into()).await;

        dispatcher
            .send_to_users(
                &[user, user],
                GatewayEvent::MemberJoin {
                    channel_id: Uuid::new_v4(),
                    user_id: user,
                },
            )
            .await;

        assert!(rx1.try_recv().unwrap().contains("MemberJoin"));
        assert!(rx2.try_recv().unwrap().contains("MemberJoin"));
        assert!(rx1.try_recv().is_err());
        assert!(rx_other.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_carries_channel_scope() {
        let dispatcher = Dispatcher::new();
        let mut events = dispatcher.subscribe();
        let channel_id = Uuid::new_v4();

        dispatcher.broadcast(GatewayEvent::TypingStart {
            channel_id,
            user_id: Uuid::new_v4(),
            display_name: "ana".into(),
        });
        dispatcher.broadcast(GatewayEvent::ChannelDelete { channel_id });

        assert_eq!(events.recv().await.unwrap().channel_id, Some(channel_id));
        assert_eq!(events.recv().await.unwrap().channel_id, None);
    }

    #[tokio::test]
    async fn revoking_a_channel_for_one_user_keeps_others_subscribed() {
        let dispatcher = Dispatcher::new();
        let channel_id = Uuid::new_v4();
        let (ana, bo) = (Uuid::new_v4(), Uuid::new_v4());

        let (ana_conn, _a) = dispatcher.connect(ana, "ana".into()).await;
        let (bo_conn, _b) = dispatcher.connect(bo, "bo".into()).await;
        for conn in [ana_conn, bo_conn] {
            dispatcher
                .set_subscriptions(conn, HashSet::from([channel_id]))
                .await;
        }

        dispatcher.revoke_channel(channel_id, Some(ana)).await;
        assert!(!dispatcher.is_subscribed(ana_conn, channel_id).await);
        assert!(dispatcher.is_subscribed(bo_conn, channel_id).await);

        dispatcher.revoke_channel(channel_id, None).await;
        assert!(!dispatcher.is_subscribed(bo_conn, channel_id).await);
    }
}
