//! 持久化网关接口
//!
//! 关联关系（消息的 room_id / user_id）在写入时不做存在性检查。

use async_trait::async_trait;

use crate::errors::RepositoryError;
use crate::message::{Message, MessageView, NewMessage};
use crate::room::{NewRoom, Room};
use crate::user::{NewUser, User};
use crate::value_objects::{RoomId, UserId};

pub type RepositoryResult<T> = Result<T, RepositoryError>;

#[cfg_attr(feature = "testing", mockall::automock)]
#[async_trait]
pub trait RoomRepository: Send + Sync {
    async fn create(&self, room: NewRoom) -> RepositoryResult<Room>;
    /// 按创建时间升序
    async fn list(&self) -> RepositoryResult<Vec<Room>>;
    async fn find_by_id(&self, id: &RoomId) -> RepositoryResult<Option<Room>>;
}

#[cfg_attr(feature = "testing", mockall::automock)]
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create(&self, user: NewUser) -> RepositoryResult<User>;
    async fn find_by_id(&self, id: &UserId) -> RepositoryResult<Option<User>>;
    /// 属于该房间的用户（按 `room_id` 过滤），按创建时间升序
    async fn list_by_room(&self, room_id: &RoomId) -> RepositoryResult<Vec<User>>;
    /// 删除并返回被删除的记录，不存在时返回 `None`
    async fn delete(&self, id: &UserId) -> RepositoryResult<Option<User>>;
}

#[cfg_attr(feature = "testing", mockall::automock)]
#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn create(&self, message: NewMessage) -> RepositoryResult<Message>;
    /// 房间消息历史，按创建时间升序（相同时间按 ID），并解析房间和用户引用
    async fn history(&self, room_id: &RoomId) -> RepositoryResult<Vec<MessageView>>;
}
