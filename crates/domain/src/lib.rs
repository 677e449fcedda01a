//! 聊天室系统核心领域模型
//!
//! 包含房间、用户、消息等持久化实体，实时连接的标识与线上事件，
//! 以及持久化网关（仓储）接口。

pub mod errors;
pub mod events;
pub mod message;
pub mod repository;
pub mod room;
pub mod user;
pub mod value_objects;

// 重新导出常用类型
pub use errors::*;
pub use events::*;
pub use message::*;
pub use repository::*;
pub use room::*;
pub use user::*;
pub use value_objects::*;
