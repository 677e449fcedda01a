//! 实时通道的线上事件
//!
//! 每个 WebSocket 文本帧承载一个事件：`{"event": <名称>, "data": {...}}`。

use serde::{Deserialize, Serialize};

use crate::user::User;
use crate::value_objects::{ConnectionId, UserId};

/// 客户端发来的事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ClientEvent {
    /// 加入房间广播组；`user_id` 可选，用于把连接绑定到已持久化的用户
    JoinRoom {
        room_id: String,
        #[serde(default)]
        user_id: Option<String>,
    },
    LeaveRoom {
        room_id: String,
    },
    /// 向房间广播一条消息
    ReceiveMessage {
        room_id: String,
        message: String,
    },
    /// 请求房间用户列表
    GetAllUsers {
        room_id: String,
    },
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::JoinRoom { .. } => "joinRoom",
            ClientEvent::LeaveRoom { .. } => "leaveRoom",
            ClientEvent::ReceiveMessage { .. } => "receiveMessage",
            ClientEvent::GetAllUsers { .. } => "getAllUsers",
        }
    }

    pub fn room_id(&self) -> &str {
        match self {
            ClientEvent::JoinRoom { room_id, .. }
            | ClientEvent::LeaveRoom { room_id }
            | ClientEvent::ReceiveMessage { room_id, .. }
            | ClientEvent::GetAllUsers { room_id } => room_id,
        }
    }
}

/// 广播到房间的消息负载
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomMessage {
    /// 消息正文
    pub message: String,
    /// 发送者显示名
    pub name: String,
    pub user_id: UserId,
    pub room_id: String,
    /// 服务器接收时间，Unix 毫秒
    pub created_at: i64,
}

/// 服务器推送的事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    ReceiveMessage(RoomMessage),
    Users {
        users: Vec<User>,
    },
    /// 新连接建立时通知其他所有连接；`user_id` 为传输层连接 ID
    UserConnected {
        user_id: ConnectionId,
        user_name: Option<String>,
    },
    UserDisconnected {
        user_id: ConnectionId,
    },
    /// 对每个成功处理的入站事件的确认
    Ack {
        event: String,
        accepted: bool,
    },
    Error {
        event: Option<String>,
        code: String,
        message: String,
    },
}

impl ServerEvent {
    pub fn ack(event: &str, accepted: bool) -> Self {
        Self::Ack {
            event: event.to_owned(),
            accepted,
        }
    }

    pub fn error(event: Option<&str>, code: &str, message: impl Into<String>) -> Self {
        Self::Error {
            event: event.map(str::to_owned),
            code: code.to_owned(),
            message: message.into(),
        }
    }
}
