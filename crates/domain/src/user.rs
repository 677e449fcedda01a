use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::value_objects::{RoomId, Timestamp, UserId};

const MAX_DISPLAY_NAME_LEN: usize = 50;

/// 进入房间时创建的用户记录。
///
/// 每次进入都会新建一条记录（不去重）；`room_id` 只是引用，不做外键约束。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub display_name: String,
    pub room_id: RoomId,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub display_name: String,
    pub room_id: RoomId,
}

impl NewUser {
    pub fn new(display_name: impl Into<String>, room_id: RoomId) -> Result<Self, DomainError> {
        let display_name = display_name.into();
        let trimmed = display_name.trim();
        if trimmed.is_empty() {
            return Err(DomainError::invalid_argument("userName", "cannot be empty"));
        }
        if trimmed.chars().count() > MAX_DISPLAY_NAME_LEN {
            return Err(DomainError::invalid_argument("userName", "too long"));
        }
        Ok(Self {
            display_name: trimmed.to_owned(),
            room_id,
        })
    }
}
