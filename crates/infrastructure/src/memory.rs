//! 进程内文档存储
//!
//! 默认存储后端，也用于集成测试。三类记录放在同一把读写锁后，
//! 时间戳在持有写锁时读取，插入顺序即创建时间顺序。

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use domain::{
    Message, MessageId, MessageRepository, MessageView, NewMessage, NewRoom, NewUser,
    RepositoryResult, Room, RoomId, RoomRepository, User, UserId, UserRepository,
};
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Default)]
struct Documents {
    rooms: Vec<Room>,
    users: HashMap<UserId, User>,
    messages: Vec<Message>,
}

#[derive(Default)]
pub struct MemoryStore {
    documents: RwLock<Documents>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RoomRepository for MemoryStore {
    async fn create(&self, room: NewRoom) -> RepositoryResult<Room> {
        let mut documents = self.documents.write().await;
        let now = Utc::now();
        let room = Room {
            id: RoomId::generate(now),
            name: room.name,
            created_at: now,
        };
        documents.rooms.push(room.clone());
        Ok(room)
    }

    async fn list(&self) -> RepositoryResult<Vec<Room>> {
        Ok(self.documents.read().await.rooms.clone())
    }

    async fn find_by_id(&self, id: &RoomId) -> RepositoryResult<Option<Room>> {
        let documents = self.documents.read().await;
        Ok(documents.rooms.iter().find(|room| &room.id == id).cloned())
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn create(&self, user: NewUser) -> RepositoryResult<User> {
        let mut documents = self.documents.write().await;
        let now = Utc::now();
        let user = User {
            id: UserId::generate(now),
            display_name: user.display_name,
            room_id: user.room_id,
            created_at: now,
        };
        documents.users.insert(user.id.clone(), user.clone());
        Ok(user)
    }

    async fn find_by_id(&self, id: &UserId) -> RepositoryResult<Option<User>> {
        Ok(self.documents.read().await.users.get(id).cloned())
    }

    async fn list_by_room(&self, room_id: &RoomId) -> RepositoryResult<Vec<User>> {
        let documents = self.documents.read().await;
        let mut users: Vec<User> = documents
            .users
            .values()
            .filter(|user| &user.room_id == room_id)
            .cloned()
            .collect();
        users.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        Ok(users)
    }

    async fn delete(&self, id: &UserId) -> RepositoryResult<Option<User>> {
        let removed = self.documents.write().await.users.remove(id);
        debug!(user_id = %id, found = removed.is_some(), "user document removed");
        Ok(removed)
    }
}

#[async_trait]
impl MessageRepository for MemoryStore {
    async fn create(&self, message: NewMessage) -> RepositoryResult<Message> {
        let mut documents = self.documents.write().await;
        let now = Utc::now();
        let message = Message {
            id: MessageId::generate(now),
            room_id: message.room_id,
            user_id: message.user_id,
            body: message.body,
            created_at: now,
        };
        documents.messages.push(message.clone());
        Ok(message)
    }

    async fn history(&self, room_id: &RoomId) -> RepositoryResult<Vec<MessageView>> {
        let documents = self.documents.read().await;
        let views = documents
            .messages
            .iter()
            .filter(|message| &message.room_id == room_id)
            .map(|message| MessageView {
                message: message.clone(),
                room: documents
                    .rooms
                    .iter()
                    .find(|room| room.id == message.room_id)
                    .cloned(),
                user: documents.users.get(&message.user_id).cloned(),
            })
            .collect();
        Ok(views)
    }
}
