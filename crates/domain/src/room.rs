use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::value_objects::{RoomId, Timestamp};

const MAX_ROOM_NAME_LEN: usize = 100;

/// 房间：创建后不可变，观察到的行为中从不删除。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub created_at: Timestamp,
}

/// 待写入的房间，名称已校验；ID 与创建时间由存储分配。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRoom {
    pub name: String,
}

impl NewRoom {
    pub fn new(name: impl Into<String>) -> Result<Self, DomainError> {
        let name = name.into();
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(DomainError::invalid_argument("roomName", "cannot be empty"));
        }
        if trimmed.chars().count() > MAX_ROOM_NAME_LEN {
            return Err(DomainError::invalid_argument("roomName", "too long"));
        }
        Ok(Self {
            name: trimmed.to_owned(),
        })
    }
}
