use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::room::Room;
use crate::user::User;
use crate::value_objects::{MessageId, RoomId, Timestamp, UserId};

/// 消息正文是否包含非空白内容。空白消息会被静默丢弃，而不是报错。
pub fn has_content(body: &str) -> bool {
    !body.trim().is_empty()
}

/// 持久化的聊天消息，写入后不可变。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub room_id: RoomId,
    pub user_id: UserId,
    pub body: String,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub room_id: RoomId,
    pub user_id: UserId,
    pub body: String,
}

impl NewMessage {
    pub fn new(room_id: RoomId, user_id: UserId, body: impl Into<String>) -> Result<Self, DomainError> {
        let body = body.into();
        if !has_content(&body) {
            return Err(DomainError::invalid_argument("message", "cannot be blank"));
        }
        Ok(Self {
            room_id,
            user_id,
            body,
        })
    }
}

/// 历史查询结果：消息本身加上解析后的房间和用户引用。
///
/// 引用不做存在性约束，悬空时对应字段为 `None`。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    #[serde(flatten)]
    pub message: Message,
    pub room: Option<Room>,
    pub user: Option<User>,
}
