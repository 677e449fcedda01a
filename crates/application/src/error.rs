use domain::{DomainError, RepositoryError, RoomId, UserId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
    #[error("room {0} not found")]
    RoomNotFound(RoomId),
    #[error("user {0} not found")]
    UserNotFound(UserId),
    /// 连接尚未通过 joinRoom 绑定用户
    #[error("connection has no user bound, send joinRoom with a userId first")]
    NotIdentified,
}

impl ApplicationError {
    /// 面向客户端的稳定错误码
    pub fn code(&self) -> &'static str {
        match self {
            ApplicationError::Domain(DomainError::InvalidId { .. }) => "INVALID_ID",
            ApplicationError::Domain(DomainError::InvalidArgument { .. }) => "INVALID_ARGUMENT",
            ApplicationError::Repository(RepositoryError::NotFound) => "NOT_FOUND",
            ApplicationError::Repository(RepositoryError::Conflict) => "CONFLICT",
            ApplicationError::Repository(RepositoryError::Unavailable { .. }) => "STORE_UNAVAILABLE",
            ApplicationError::RoomNotFound(_) => "ROOM_NOT_FOUND",
            ApplicationError::UserNotFound(_) => "USER_NOT_FOUND",
            ApplicationError::NotIdentified => "NOT_IDENTIFIED",
        }
    }
}
