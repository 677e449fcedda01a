//! Web API 层。
//!
//! 提供 Axum 路由：CRUD 请求委托给 `ChatService`，
//! WebSocket 连接交给房间中继。

mod error;
mod routes;
mod state;
mod websocket;

pub use error::ApiError;
pub use routes::router;
pub use state::AppState;
