//! 房间中继
//!
//! 把加入、离开、消息等实时事件扇出到房间内所有连接，
//! 需要显示名时查询持久化网关。中继不持久化消息：
//! 实时广播与 CRUD 发送消息是两条独立的写路径。

use std::collections::HashMap;
use std::sync::Arc;

use domain::{
    has_content, ClientEvent, ConnectionId, RoomId, RoomMessage, ServerEvent, UserId,
    UserRepository,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::broadcaster::{BroadcastGroups, EventSender};
use crate::clock::Clock;
use crate::error::ApplicationError;
use crate::registry::ConnectionRegistry;

/// 单次中继调用的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// 已投递给房间内的若干连接
    Delivered(usize),
    /// 空白消息，静默丢弃
    Dropped,
}

impl RelayOutcome {
    pub fn accepted(self) -> bool {
        matches!(self, RelayOutcome::Delivered(_))
    }
}

pub struct RoomRelay {
    registry: Arc<ConnectionRegistry>,
    users: Arc<dyn UserRepository>,
    clock: Arc<dyn Clock>,
    /// 每个房间一条先进先出通道：公平锁的获取顺序即消息的受理顺序
    lanes: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    announce_disconnects: bool,
}

impl RoomRelay {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        users: Arc<dyn UserRepository>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            users,
            clock,
            lanes: Mutex::new(HashMap::new()),
            announce_disconnects: false,
        }
    }

    /// 断开连接时是否向其他连接广播 `userDisconnected`
    pub fn with_disconnect_announcements(mut self, enabled: bool) -> Self {
        self.announce_disconnects = enabled;
        self
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// 登记新连接并通知其他所有连接
    pub async fn connect(&self, connection_id: ConnectionId, sender: EventSender) {
        self.registry.on_connect(connection_id, sender).await;
        self.broadcast_user_connected(connection_id).await;
    }

    /// 传输层断开时调用，每个连接生命周期恰好一次
    pub async fn disconnect(&self, connection_id: ConnectionId) {
        let rooms = self.registry.on_disconnect(connection_id).await;
        debug!(%connection_id, ?rooms, "connection removed from rooms");
        if self.announce_disconnects {
            self.registry
                .publish_except(
                    connection_id,
                    ServerEvent::UserDisconnected {
                        user_id: connection_id,
                    },
                )
                .await;
        }
    }

    pub async fn broadcast_user_connected(&self, connection_id: ConnectionId) -> usize {
        self.registry
            .publish_except(
                connection_id,
                ServerEvent::UserConnected {
                    user_id: connection_id,
                    user_name: None,
                },
            )
            .await
    }

    /// 向房间广播消息，包括发送者自己。
    ///
    /// 显示名查询失败只让本次调用失败，不影响连接。
    pub async fn relay_message(
        &self,
        room_id: &str,
        sender: ConnectionId,
        body: &str,
    ) -> Result<RelayOutcome, ApplicationError> {
        if !has_content(body) {
            debug!(connection_id = %sender, room_id, "blank message dropped");
            return Ok(RelayOutcome::Dropped);
        }

        let lane = self.lane(room_id).await;
        let result = {
            let _turn = lane.lock().await;
            self.deliver_message(room_id, sender, body).await
        };
        drop(lane);
        self.release_lane(room_id).await;
        result
    }

    async fn deliver_message(
        &self,
        room_id: &str,
        sender: ConnectionId,
        body: &str,
    ) -> Result<RelayOutcome, ApplicationError> {
        let user_id = self
            .registry
            .user_of(sender)
            .await
            .ok_or(ApplicationError::NotIdentified)?;
        let user = self
            .users
            .find_by_id(&user_id)
            .await?
            .ok_or_else(|| ApplicationError::UserNotFound(user_id.clone()))?;

        let event = ServerEvent::ReceiveMessage(RoomMessage {
            message: body.to_owned(),
            name: user.display_name,
            user_id,
            room_id: room_id.to_owned(),
            created_at: self.clock.now().timestamp_millis(),
        });
        let delivered = self.registry.publish(room_id, event).await;
        debug!(connection_id = %sender, room_id, delivered, "message relayed");
        Ok(RelayOutcome::Delivered(delivered))
    }

    /// 查询属于该房间的用户（按房间过滤，而不是按连接身份）并广播给房间
    pub async fn relay_user_list(&self, room_id: &str) -> Result<usize, ApplicationError> {
        let room = RoomId::parse(room_id)?;
        let users = self.users.list_by_room(&room).await?;
        let delivered = self
            .registry
            .publish(room_id, ServerEvent::Users { users })
            .await;
        debug!(room_id, delivered, "user list relayed");
        Ok(delivered)
    }

    /// 处理一个入站事件，返回给发送者的确认或错误事件
    pub async fn handle_event(&self, connection_id: ConnectionId, event: ClientEvent) -> ServerEvent {
        let name = event.name();
        let result = match event {
            ClientEvent::JoinRoom { room_id, user_id } => {
                self.join(connection_id, &room_id, user_id.as_deref()).await
            }
            ClientEvent::LeaveRoom { room_id } => {
                self.registry.leave(connection_id, &room_id).await;
                Ok(true)
            }
            ClientEvent::ReceiveMessage { room_id, message } => self
                .relay_message(&room_id, connection_id, &message)
                .await
                .map(RelayOutcome::accepted),
            ClientEvent::GetAllUsers { room_id } => {
                self.relay_user_list(&room_id).await.map(|_| true)
            }
        };

        match result {
            Ok(accepted) => ServerEvent::ack(name, accepted),
            Err(err) => {
                warn!(%connection_id, event = name, error = %err, "realtime event failed");
                ServerEvent::error(Some(name), err.code(), err.to_string())
            }
        }
    }

    async fn join(
        &self,
        connection_id: ConnectionId,
        room_id: &str,
        user_id: Option<&str>,
    ) -> Result<bool, ApplicationError> {
        // 先校验，避免半完成的加入
        let user_id = user_id.map(UserId::parse).transpose()?;
        self.registry.join(connection_id, room_id).await;
        if let Some(user_id) = user_id {
            self.registry.assign_user(connection_id, user_id).await;
        }
        info!(%connection_id, room_id, "joined chat room");
        Ok(true)
    }

    async fn lane(&self, room_id: &str) -> Arc<Mutex<()>> {
        let mut lanes = self.lanes.lock().await;
        lanes.entry(room_id.to_owned()).or_default().clone()
    }

    /// 没有其他调用持有或等待时移除房间通道
    async fn release_lane(&self, room_id: &str) {
        let mut lanes = self.lanes.lock().await;
        if lanes
            .get(room_id)
            .is_some_and(|lane| Arc::strong_count(lane) == 1)
        {
            lanes.remove(room_id);
        }
    }

    #[cfg(test)]
    async fn lane_count(&self) -> usize {
        self.lanes.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use domain::{MockUserRepository, RepositoryError, Timestamp, User};
    use std::time::Duration;
    use tokio::sync::mpsc;

    const ROOM: &str = "5f1d7a2b3c4d5e6f7a8b9c0d";
    const OTHER_ROOM: &str = "5f1d7a2b3c4d5e6f7a8b9c99";

    struct FixedClock(Timestamp);

    impl Clock for FixedClock {
        fn now(&self) -> Timestamp {
            self.0
        }
    }

    fn fixed_now() -> Timestamp {
        DateTime::<Utc>::from_timestamp(1_600_000_000, 0).unwrap()
    }

    fn user(id: &str, name: &str, room: &str) -> User {
        User {
            id: UserId::parse(id).unwrap(),
            display_name: name.to_owned(),
            room_id: RoomId::parse(room).unwrap(),
            created_at: fixed_now(),
        }
    }

    fn relay_with(users: MockUserRepository) -> RoomRelay {
        RoomRelay::new(
            Arc::new(ConnectionRegistry::new()),
            Arc::new(users),
            Arc::new(FixedClock(fixed_now())),
        )
    }

    async fn connect(relay: &RoomRelay) -> (ConnectionId, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = ConnectionId::new();
        relay.registry().on_connect(id, tx).await;
        (id, rx)
    }

    fn ruby_repository() -> MockUserRepository {
        let ruby = user("5f1d7a2b3c4d5e6f7a8b9c0e", "Ruby", ROOM);
        let mut users = MockUserRepository::new();
        users
            .expect_find_by_id()
            .returning(move |_| Ok(Some(ruby.clone())));
        users
    }

    fn join(room: &str, user_id: Option<&str>) -> ClientEvent {
        ClientEvent::JoinRoom {
            room_id: room.to_owned(),
            user_id: user_id.map(str::to_owned),
        }
    }

    fn say(room: &str, body: &str) -> ClientEvent {
        ClientEvent::ReceiveMessage {
            room_id: room.to_owned(),
            message: body.to_owned(),
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn bodies(events: &[ServerEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|event| match event {
                ServerEvent::ReceiveMessage(message) => Some(message.message.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn message_reaches_every_member_including_sender() {
        let relay = relay_with(ruby_repository());
        let (sender, mut sender_rx) = connect(&relay).await;
        let (peer, mut peer_rx) = connect(&relay).await;
        let (_outsider, mut outsider_rx) = connect(&relay).await;

        relay
            .handle_event(sender, join(ROOM, Some("5f1d7a2b3c4d5e6f7a8b9c0e")))
            .await;
        relay.handle_event(peer, join(ROOM, None)).await;

        let reply = relay.handle_event(sender, say(ROOM, "hello")).await;
        assert_eq!(reply, ServerEvent::ack("receiveMessage", true));

        let expected = ServerEvent::ReceiveMessage(RoomMessage {
            message: "hello".into(),
            name: "Ruby".into(),
            user_id: UserId::parse("5f1d7a2b3c4d5e6f7a8b9c0e").unwrap(),
            room_id: ROOM.into(),
            created_at: 1_600_000_000_000,
        });
        assert_eq!(drain(&mut sender_rx), vec![expected.clone()]);
        assert_eq!(drain(&mut peer_rx), vec![expected]);
        assert!(drain(&mut outsider_rx).is_empty());
    }

    #[tokio::test]
    async fn whitespace_message_produces_no_delivery() {
        // 没有设置任何期望：空白消息不能触发用户查询
        let relay = relay_with(MockUserRepository::new());
        let (sender, mut rx) = connect(&relay).await;
        relay.handle_event(sender, join(ROOM, None)).await;

        let outcome = relay.relay_message(ROOM, sender, "  \n\t").await.unwrap();
        assert_eq!(outcome, RelayOutcome::Dropped);

        let reply = relay.handle_event(sender, say(ROOM, "   ")).await;
        assert_eq!(reply, ServerEvent::ack("receiveMessage", false));
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn messages_arrive_in_submission_order() {
        let relay = relay_with(ruby_repository());
        let (sender, mut sender_rx) = connect(&relay).await;
        let (peer, mut peer_rx) = connect(&relay).await;
        relay
            .handle_event(sender, join(ROOM, Some("5f1d7a2b3c4d5e6f7a8b9c0e")))
            .await;
        relay.handle_event(peer, join(ROOM, None)).await;

        let sent: Vec<String> = (0..20).map(|n| format!("message {n}")).collect();
        for body in &sent {
            relay.relay_message(ROOM, sender, body).await.unwrap();
        }

        assert_eq!(bodies(&drain(&mut sender_rx)), sent);
        assert_eq!(bodies(&drain(&mut peer_rx)), sent);
    }

    #[tokio::test]
    async fn unidentified_sender_gets_error_and_stays_connected() {
        let relay = relay_with(MockUserRepository::new());
        let (sender, mut rx) = connect(&relay).await;
        relay.handle_event(sender, join(ROOM, None)).await;

        let reply = relay.handle_event(sender, say(ROOM, "hi")).await;
        match reply {
            ServerEvent::Error { event, code, .. } => {
                assert_eq!(event.as_deref(), Some("receiveMessage"));
                assert_eq!(code, "NOT_IDENTIFIED");
            }
            other => panic!("expected error event, got {other:?}"),
        }
        assert!(relay.registry().is_connected(sender).await);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn unknown_user_fails_only_that_relay_call() {
        let mut users = MockUserRepository::new();
        users.expect_find_by_id().returning(|_| Ok(None));
        let relay = relay_with(users);
        let (sender, _rx) = connect(&relay).await;
        relay
            .handle_event(sender, join(ROOM, Some("5f1d7a2b3c4d5e6f7a8b9c0e")))
            .await;

        let err = relay.relay_message(ROOM, sender, "hi").await.unwrap_err();
        assert_eq!(err.code(), "USER_NOT_FOUND");
        assert!(relay.registry().is_connected(sender).await);
        assert_eq!(relay.lane_count().await, 0);
    }

    #[tokio::test]
    async fn store_failure_is_reported_as_unavailable() {
        let mut users = MockUserRepository::new();
        users
            .expect_find_by_id()
            .returning(|_| Err(RepositoryError::unavailable("connection refused")));
        let relay = relay_with(users);
        let (sender, _rx) = connect(&relay).await;
        relay
            .handle_event(sender, join(ROOM, Some("5f1d7a2b3c4d5e6f7a8b9c0e")))
            .await;

        let reply = relay.handle_event(sender, say(ROOM, "hi")).await;
        assert!(matches!(reply, ServerEvent::Error { ref code, .. } if code == "STORE_UNAVAILABLE"));
    }

    #[tokio::test]
    async fn malformed_user_id_on_join_leaves_state_untouched() {
        let relay = relay_with(MockUserRepository::new());
        let (conn, _rx) = connect(&relay).await;

        let reply = relay.handle_event(conn, join(ROOM, Some("nope"))).await;
        assert!(matches!(reply, ServerEvent::Error { ref code, .. } if code == "INVALID_ID"));
        assert!(relay.registry().rooms_of(conn).await.is_empty());
        assert!(relay.registry().user_of(conn).await.is_none());
    }

    #[tokio::test]
    async fn leave_for_room_never_joined_is_acknowledged() {
        let relay = relay_with(MockUserRepository::new());
        let (conn, _rx) = connect(&relay).await;
        let reply = relay
            .handle_event(
                conn,
                ClientEvent::LeaveRoom {
                    room_id: ROOM.into(),
                },
            )
            .await;
        assert_eq!(reply, ServerEvent::ack("leaveRoom", true));
        assert!(relay.registry().rooms_of(conn).await.is_empty());
    }

    #[tokio::test]
    async fn user_list_is_filtered_by_room() {
        let in_room = user("5f1d7a2b3c4d5e6f7a8b9c0e", "Ruby", ROOM);
        let mut users = MockUserRepository::new();
        let listed = vec![in_room.clone()];
        users
            .expect_list_by_room()
            .withf(|room| room.as_str() == ROOM)
            .times(1)
            .returning(move |_| Ok(listed.clone()));
        let relay = relay_with(users);

        let (member, mut member_rx) = connect(&relay).await;
        let (other, mut other_rx) = connect(&relay).await;
        relay.handle_event(member, join(ROOM, None)).await;
        relay.handle_event(other, join(OTHER_ROOM, None)).await;

        let reply = relay
            .handle_event(
                member,
                ClientEvent::GetAllUsers {
                    room_id: ROOM.into(),
                },
            )
            .await;
        assert_eq!(reply, ServerEvent::ack("getAllUsers", true));
        assert_eq!(
            drain(&mut member_rx),
            vec![ServerEvent::Users {
                users: vec![in_room]
            }]
        );
        assert!(drain(&mut other_rx).is_empty());
    }

    #[tokio::test]
    async fn user_list_for_malformed_room_id_is_rejected() {
        let relay = relay_with(MockUserRepository::new());
        let err = relay.relay_user_list("lobby").await.unwrap_err();
        assert_eq!(err.code(), "INVALID_ID");
    }

    #[tokio::test]
    async fn connect_is_announced_to_others_only() {
        let relay = relay_with(MockUserRepository::new());
        let (_first, mut first_rx) = connect(&relay).await;

        let (tx, mut second_rx) = mpsc::unbounded_channel();
        let second = ConnectionId::new();
        relay.connect(second, tx).await;

        assert_eq!(
            drain(&mut first_rx),
            vec![ServerEvent::UserConnected {
                user_id: second,
                user_name: None
            }]
        );
        assert!(drain(&mut second_rx).is_empty());
    }

    #[tokio::test]
    async fn disconnect_is_silent_by_default() {
        let relay = relay_with(MockUserRepository::new());
        let (a, _rx_a) = connect(&relay).await;
        let (_b, mut rx_b) = connect(&relay).await;
        relay.handle_event(a, join(ROOM, None)).await;

        relay.disconnect(a).await;
        assert!(drain(&mut rx_b).is_empty());
        assert!(relay.registry().members(ROOM).await.is_empty());
    }

    #[tokio::test]
    async fn disconnect_announcement_can_be_enabled() {
        let relay = relay_with(MockUserRepository::new()).with_disconnect_announcements(true);
        let (a, _rx_a) = connect(&relay).await;
        let (_b, mut rx_b) = connect(&relay).await;

        relay.disconnect(a).await;
        assert_eq!(
            drain(&mut rx_b),
            vec![ServerEvent::UserDisconnected { user_id: a }]
        );
    }

    #[tokio::test]
    async fn disconnected_connection_never_receives_later_broadcasts() {
        let relay = relay_with(ruby_repository());
        let (sender, _sender_rx) = connect(&relay).await;
        let (gone, mut gone_rx) = connect(&relay).await;
        relay
            .handle_event(sender, join(ROOM, Some("5f1d7a2b3c4d5e6f7a8b9c0e")))
            .await;
        relay.handle_event(gone, join(ROOM, None)).await;

        relay.disconnect(gone).await;
        let outcome = relay.relay_message(ROOM, sender, "after").await.unwrap();
        assert_eq!(outcome, RelayOutcome::Delivered(1));
        assert!(drain(&mut gone_rx).is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_senders_are_seen_in_one_order_by_every_member() {
        const SENDERS: usize = 6;
        const PER_SENDER: usize = 200;

        let relay = Arc::new(relay_with(ruby_repository()));
        let mut members = Vec::new();
        for _ in 0..SENDERS {
            let (id, rx) = connect(&relay).await;
            relay
                .handle_event(id, join(ROOM, Some("5f1d7a2b3c4d5e6f7a8b9c0e")))
                .await;
            members.push((id, rx));
        }

        let tasks: Vec<_> = members
            .iter()
            .enumerate()
            .map(|(sender_index, (id, _))| {
                let relay = relay.clone();
                let id = *id;
                tokio::spawn(async move {
                    for n in 0..PER_SENDER {
                        let body = format!("{sender_index}-{n}");
                        relay.relay_message(ROOM, id, &body).await.unwrap();
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let seen: Vec<Vec<String>> = members
            .iter_mut()
            .map(|(_, rx)| bodies(&drain(rx)))
            .collect();
        assert_eq!(seen[0].len(), SENDERS * PER_SENDER);
        for other in &seen[1..] {
            assert_eq!(other, &seen[0]);
        }

        // 每个发送者自己的消息保持提交顺序
        for sender_index in 0..SENDERS {
            let prefix = format!("{sender_index}-");
            let own: Vec<&String> = seen[0].iter().filter(|b| b.starts_with(&prefix)).collect();
            let expected: Vec<String> = (0..PER_SENDER).map(|n| format!("{prefix}{n}")).collect();
            assert_eq!(own, expected.iter().collect::<Vec<_>>());
        }
        assert_eq!(relay.lane_count().await, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn slow_lookup_in_one_room_does_not_block_another() {
        let ruby = user("5f1d7a2b3c4d5e6f7a8b9c0e", "Ruby", ROOM);
        let slow_id = UserId::parse("5f1d7a2b3c4d5e6f7a8b9c0f").unwrap();
        let mut users = MockUserRepository::new();
        users.expect_find_by_id().returning(move |id| {
            if *id == slow_id {
                std::thread::sleep(Duration::from_millis(300));
            }
            Ok(Some(ruby.clone()))
        });
        let relay = Arc::new(relay_with(users));

        let (slow, _slow_rx) = connect(&relay).await;
        let (fast, mut fast_rx) = connect(&relay).await;
        relay
            .handle_event(slow, join(OTHER_ROOM, Some("5f1d7a2b3c4d5e6f7a8b9c0f")))
            .await;
        relay
            .handle_event(fast, join(ROOM, Some("5f1d7a2b3c4d5e6f7a8b9c0e")))
            .await;

        let slow_task = tokio::spawn({
            let relay = relay.clone();
            async move { relay.relay_message(OTHER_ROOM, slow, "slow").await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let started = std::time::Instant::now();
        relay.relay_message(ROOM, fast, "fast").await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(250));
        assert_eq!(bodies(&drain(&mut fast_rx)), vec!["fast".to_owned()]);

        slow_task.await.unwrap().unwrap();
    }
}
