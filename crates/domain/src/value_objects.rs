use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use data_encoding::HEXLOWER;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::DomainError;

/// 统一的时间戳类型。
pub type Timestamp = DateTime<Utc>;

const DOCUMENT_ID_LEN: usize = 24;

/// 文档存储生成的标识：12 字节，24 位小写十六进制。
///
/// 前 4 字节是秒级时间戳（大端），其余 8 字节随机，
/// 与常见文档数据库的对象 ID 格式兼容。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DocumentId(String);

impl DocumentId {
    pub fn generate(now: Timestamp) -> Self {
        let mut bytes = [0u8; 12];
        let seconds = now.timestamp().clamp(0, u32::MAX as i64) as u32;
        bytes[..4].copy_from_slice(&seconds.to_be_bytes());
        bytes[4..].copy_from_slice(&rand::random::<[u8; 8]>());
        Self(HEXLOWER.encode(&bytes))
    }

    /// 只接受 `^[0-9a-fA-F]{24}$`，统一转换为小写。
    pub fn parse(value: &str) -> Result<Self, DomainError> {
        if value.len() != DOCUMENT_ID_LEN || !value.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(DomainError::invalid_id(value));
        }
        Ok(Self(value.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DocumentId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for DocumentId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<DocumentId> for String {
    fn from(value: DocumentId) -> Self {
        value.0
    }
}

macro_rules! document_id_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub DocumentId);

        impl $name {
            pub fn generate(now: Timestamp) -> Self {
                Self(DocumentId::generate(now))
            }

            pub fn parse(value: &str) -> Result<Self, DomainError> {
                DocumentId::parse(value).map(Self)
            }

            pub fn as_str(&self) -> &str {
                self.0.as_str()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl FromStr for $name {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl From<DocumentId> for $name {
            fn from(value: DocumentId) -> Self {
                Self(value)
            }
        }
    };
}

document_id_newtype!(
    /// 房间唯一标识。
    RoomId
);
document_id_newtype!(
    /// 用户唯一标识。
    UserId
);
document_id_newtype!(
    /// 消息唯一标识。
    MessageId
);

/// 实时连接标识，由传输层在连接建立时分配，不持久化。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
