//! 房间、用户、消息的 CRUD 用例
//!
//! 无状态的请求/响应操作，直接调用持久化网关，不经过实时中继。

use std::sync::Arc;

use domain::{
    has_content, Message, MessageRepository, MessageView, NewMessage, NewRoom, NewUser, Room,
    RoomId, RoomRepository, User, UserId, UserRepository,
};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::ApplicationError;

pub struct ChatServiceDependencies {
    pub room_repository: Arc<dyn RoomRepository>,
    pub user_repository: Arc<dyn UserRepository>,
    pub message_repository: Arc<dyn MessageRepository>,
}

#[derive(Debug, Clone)]
pub struct EnterRoomRequest {
    pub user_name: String,
    pub room_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnteredRoom {
    pub user: User,
    pub room_name: String,
}

#[derive(Debug, Clone)]
pub struct SendMessageRequest {
    pub room_id: String,
    pub user_id: String,
    pub message: String,
}

pub struct ChatService {
    rooms: Arc<dyn RoomRepository>,
    users: Arc<dyn UserRepository>,
    messages: Arc<dyn MessageRepository>,
}

impl ChatService {
    pub fn new(deps: ChatServiceDependencies) -> Self {
        Self {
            rooms: deps.room_repository,
            users: deps.user_repository,
            messages: deps.message_repository,
        }
    }

    pub async fn create_room(&self, name: String) -> Result<Room, ApplicationError> {
        let room = self.rooms.create(NewRoom::new(name)?).await?;
        info!(room_id = %room.id, name = %room.name, "room created");
        Ok(room)
    }

    pub async fn list_rooms(&self) -> Result<Vec<Room>, ApplicationError> {
        Ok(self.rooms.list().await?)
    }

    /// 进入房间：每次都新建一条用户记录。
    ///
    /// 房间 ID 格式错误或房间不存在时不会创建任何记录。
    pub async fn enter_room(&self, request: EnterRoomRequest) -> Result<EnteredRoom, ApplicationError> {
        let room_id = RoomId::parse(&request.room_id)?;
        let new_user = NewUser::new(request.user_name, room_id.clone())?;
        let room = self
            .rooms
            .find_by_id(&room_id)
            .await?
            .ok_or_else(|| ApplicationError::RoomNotFound(room_id))?;

        let user = self.users.create(new_user).await?;
        info!(user_id = %user.id, room_id = %room.id, "user entered room");
        Ok(EnteredRoom {
            user,
            room_name: room.name,
        })
    }

    /// 持久化一条消息。空白消息被静默忽略，返回 `None`。
    ///
    /// 不检查房间和用户是否存在。
    pub async fn send_message(
        &self,
        request: SendMessageRequest,
    ) -> Result<Option<Message>, ApplicationError> {
        let room_id = RoomId::parse(&request.room_id)?;
        let user_id = UserId::parse(&request.user_id)?;
        if !has_content(&request.message) {
            debug!(%room_id, %user_id, "blank message ignored");
            return Ok(None);
        }

        let message = self
            .messages
            .create(NewMessage::new(room_id, user_id, request.message)?)
            .await?;
        debug!(message_id = %message.id, room_id = %message.room_id, "message stored");
        Ok(Some(message))
    }

    pub async fn message_history(&self, room_id: &str) -> Result<Vec<MessageView>, ApplicationError> {
        let room_id = RoomId::parse(room_id)?;
        Ok(self.messages.history(&room_id).await?)
    }

    /// 删除用户记录，返回被删除的记录（不存在时为 `None`）
    pub async fn remove_user(&self, user_id: &str) -> Result<Option<User>, ApplicationError> {
        let user_id = UserId::parse(user_id)?;
        let removed = self.users.delete(&user_id).await?;
        info!(%user_id, removed = removed.is_some(), "user removal requested");
        Ok(removed)
    }
}
