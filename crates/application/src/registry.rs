//! 连接注册表
//!
//! 维护每个实时连接的出站队列、绑定的用户，以及房间到连接的成员索引。
//! 两张表由同一把读写锁保护：加入、离开、断开对发布来说是原子的，
//! 不会出现向正在移除的连接投递，也不会重复移除。

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use domain::{ConnectionId, ServerEvent, UserId};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::broadcaster::{BroadcastGroups, EventSender};

struct ConnectionEntry {
    sender: EventSender,
    user_id: Option<UserId>,
    rooms: HashSet<String>,
}

#[derive(Default)]
struct RegistryState {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    rooms: HashMap<String, HashSet<ConnectionId>>,
}

impl RegistryState {
    fn deliver(&self, connection_id: &ConnectionId, event: ServerEvent) -> bool {
        match self.connections.get(connection_id) {
            Some(entry) => {
                if entry.sender.send(event).is_err() {
                    debug!(%connection_id, "outbound queue closed, delivery dropped");
                    return false;
                }
                true
            }
            None => false,
        }
    }
}

/// 进程级连接注册表，在启动时创建、注入到中继和路由状态中。
#[derive(Default)]
pub struct ConnectionRegistry {
    state: RwLock<RegistryState>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记新连接，此时尚未绑定用户
    pub async fn on_connect(&self, connection_id: ConnectionId, sender: EventSender) {
        let mut state = self.state.write().await;
        state.connections.insert(
            connection_id,
            ConnectionEntry {
                sender,
                user_id: None,
                rooms: HashSet::new(),
            },
        );
        info!(%connection_id, active = state.connections.len(), "connection registered");
    }

    /// 从所有房间移除并丢弃注册项，返回它曾所在的房间。
    ///
    /// 对同一连接重复调用是无害的空操作。
    pub async fn on_disconnect(&self, connection_id: ConnectionId) -> Vec<String> {
        let mut state = self.state.write().await;
        let Some(entry) = state.connections.remove(&connection_id) else {
            return Vec::new();
        };

        for room in &entry.rooms {
            if let Some(members) = state.rooms.get_mut(room) {
                members.remove(&connection_id);
                if members.is_empty() {
                    state.rooms.remove(room);
                }
            }
        }

        info!(
            %connection_id,
            rooms = entry.rooms.len(),
            active = state.connections.len(),
            "connection unregistered"
        );
        entry.rooms.into_iter().collect()
    }

    /// 把连接绑定到已持久化的用户。连接未知时返回 `false`。
    pub async fn assign_user(&self, connection_id: ConnectionId, user_id: UserId) -> bool {
        let mut state = self.state.write().await;
        match state.connections.get_mut(&connection_id) {
            Some(entry) => {
                debug!(%connection_id, %user_id, "user bound to connection");
                entry.user_id = Some(user_id);
                true
            }
            None => {
                warn!(%connection_id, "assign_user on unknown connection ignored");
                false
            }
        }
    }

    pub async fn user_of(&self, connection_id: ConnectionId) -> Option<UserId> {
        let state = self.state.read().await;
        state
            .connections
            .get(&connection_id)
            .and_then(|entry| entry.user_id.clone())
    }

    pub async fn is_connected(&self, connection_id: ConnectionId) -> bool {
        self.state.read().await.connections.contains_key(&connection_id)
    }

    pub async fn rooms_of(&self, connection_id: ConnectionId) -> Vec<String> {
        let state = self.state.read().await;
        state
            .connections
            .get(&connection_id)
            .map(|entry| entry.rooms.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn members(&self, room: &str) -> Vec<ConnectionId> {
        let state = self.state.read().await;
        state
            .rooms
            .get(room)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    pub async fn connection_count(&self) -> usize {
        self.state.read().await.connections.len()
    }

    /// 只投递给单个连接，用于确认和错误事件
    pub async fn send_to(&self, connection_id: ConnectionId, event: ServerEvent) -> bool {
        self.state.read().await.deliver(&connection_id, event)
    }
}

#[async_trait]
impl BroadcastGroups for ConnectionRegistry {
    async fn join(&self, connection_id: ConnectionId, group: &str) -> bool {
        let mut state = self.state.write().await;
        let Some(entry) = state.connections.get_mut(&connection_id) else {
            warn!(%connection_id, room_id = group, "join from unknown connection ignored");
            return false;
        };
        if !entry.rooms.insert(group.to_owned()) {
            return false;
        }
        state
            .rooms
            .entry(group.to_owned())
            .or_default()
            .insert(connection_id);
        info!(%connection_id, room_id = group, "connection joined room");
        true
    }

    async fn leave(&self, connection_id: ConnectionId, group: &str) -> bool {
        let mut state = self.state.write().await;
        let removed = state
            .connections
            .get_mut(&connection_id)
            .is_some_and(|entry| entry.rooms.remove(group));
        if !removed {
            return false;
        }
        if let Some(members) = state.rooms.get_mut(group) {
            members.remove(&connection_id);
            if members.is_empty() {
                state.rooms.remove(group);
            }
        }
        info!(%connection_id, room_id = group, "connection left room");
        true
    }

    async fn publish(&self, group: &str, event: ServerEvent) -> usize {
        let state = self.state.read().await;
        let Some(members) = state.rooms.get(group) else {
            return 0;
        };
        members
            .iter()
            .filter(|connection_id| state.deliver(connection_id, event.clone()))
            .count()
    }

    async fn publish_except(&self, excluded: ConnectionId, event: ServerEvent) -> usize {
        let state = self.state.read().await;
        state
            .connections
            .keys()
            .filter(|connection_id| **connection_id != excluded)
            .filter(|connection_id| state.deliver(connection_id, event.clone()))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    async fn connect(
        registry: &ConnectionRegistry,
    ) -> (ConnectionId, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = ConnectionId::new();
        registry.on_connect(id, tx).await;
        (id, rx)
    }

    fn ping(n: u32) -> ServerEvent {
        ServerEvent::ack(&format!("ping-{n}"), true)
    }

    #[tokio::test]
    async fn join_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let (a, mut rx) = connect(&registry).await;

        assert!(registry.join(a, "room").await);
        assert!(!registry.join(a, "room").await);
        assert_eq!(registry.members("room").await, vec![a]);

        assert_eq!(registry.publish("room", ping(1)).await, 1);
        assert_eq!(rx.recv().await, Some(ping(1)));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn leave_without_membership_changes_nothing() {
        let registry = ConnectionRegistry::new();
        let (a, _rx) = connect(&registry).await;
        registry.join(a, "joined").await;

        assert!(!registry.leave(a, "never-joined").await);
        assert_eq!(registry.rooms_of(a).await, vec!["joined".to_owned()]);
        assert!(registry.is_connected(a).await);
    }

    #[tokio::test]
    async fn unknown_connection_is_silently_ineffective() {
        let registry = ConnectionRegistry::new();
        let ghost = ConnectionId::new();

        assert!(!registry.join(ghost, "room").await);
        assert!(!registry.leave(ghost, "room").await);
        assert!(registry.members("room").await.is_empty());
        assert!(registry.on_disconnect(ghost).await.is_empty());
    }

    #[tokio::test]
    async fn connection_may_belong_to_several_rooms() {
        let registry = ConnectionRegistry::new();
        let (a, mut rx) = connect(&registry).await;
        registry.join(a, "one").await;
        registry.join(a, "two").await;

        registry.publish("one", ping(1)).await;
        registry.publish("two", ping(2)).await;
        assert_eq!(rx.recv().await, Some(ping(1)));
        assert_eq!(rx.recv().await, Some(ping(2)));

        registry.leave(a, "one").await;
        assert_eq!(registry.publish("one", ping(3)).await, 0);
        assert_eq!(registry.rooms_of(a).await, vec!["two".to_owned()]);
    }

    #[tokio::test]
    async fn disconnect_removes_from_every_room() {
        let registry = ConnectionRegistry::new();
        let (a, _rx_a) = connect(&registry).await;
        let (b, mut rx_b) = connect(&registry).await;
        for room in ["one", "two"] {
            registry.join(a, room).await;
            registry.join(b, room).await;
        }

        let mut left = registry.on_disconnect(a).await;
        left.sort();
        assert_eq!(left, vec!["one".to_owned(), "two".to_owned()]);
        assert!(!registry.is_connected(a).await);

        for room in ["one", "two"] {
            assert_eq!(registry.members(room).await, vec![b]);
            assert_eq!(registry.publish(room, ping(7)).await, 1);
            assert_eq!(rx_b.recv().await, Some(ping(7)));
        }

        // 第二次断开是空操作
        assert!(registry.on_disconnect(a).await.is_empty());
    }

    #[tokio::test]
    async fn publish_except_skips_the_excluded_connection() {
        let registry = ConnectionRegistry::new();
        let (a, mut rx_a) = connect(&registry).await;
        let (_b, mut rx_b) = connect(&registry).await;
        let (_c, mut rx_c) = connect(&registry).await;

        assert_eq!(registry.publish_except(a, ping(1)).await, 2);
        assert_eq!(rx_b.recv().await, Some(ping(1)));
        assert_eq!(rx_c.recv().await, Some(ping(1)));
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_outbound_queue_is_not_counted() {
        let registry = ConnectionRegistry::new();
        let (a, rx_a) = connect(&registry).await;
        let (b, mut rx_b) = connect(&registry).await;
        registry.join(a, "room").await;
        registry.join(b, "room").await;
        drop(rx_a);

        assert_eq!(registry.publish("room", ping(1)).await, 1);
        assert_eq!(rx_b.recv().await, Some(ping(1)));
    }

    #[tokio::test]
    async fn user_binding_is_per_connection() {
        let registry = ConnectionRegistry::new();
        let (a, _rx_a) = connect(&registry).await;
        let (b, _rx_b) = connect(&registry).await;
        let user = UserId::parse("5f1d7a2b3c4d5e6f7a8b9c0e").unwrap();

        assert!(registry.user_of(a).await.is_none());
        assert!(registry.assign_user(a, user.clone()).await);
        assert_eq!(registry.user_of(a).await, Some(user));
        assert!(registry.user_of(b).await.is_none());
        assert!(!registry.assign_user(ConnectionId::new(), UserId::parse("5f1d7a2b3c4d5e6f7a8b9c0f").unwrap()).await);
    }
}
