//! 应用层实现。
//!
//! 实时部分由连接注册表（广播组成员关系）和房间中继（事件扇出）组成；
//! CRUD 部分由 `ChatService` 直接调用持久化网关。

pub mod broadcaster;
pub mod clock;
pub mod error;
pub mod registry;
pub mod relay;
pub mod services;

pub use broadcaster::{BroadcastGroups, EventSender};
pub use clock::{Clock, SystemClock};
pub use error::ApplicationError;
pub use registry::ConnectionRegistry;
pub use relay::{RelayOutcome, RoomRelay};
pub use services::{
    ChatService, ChatServiceDependencies, EnterRoomRequest, EnteredRoom, SendMessageRequest,
};
