use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{
    Message, MessageId, MessageRepository, MessageView, NewMessage, NewRoom, NewUser,
    RepositoryError, RepositoryResult, Room, RoomId, RoomRepository, User, UserId, UserRepository,
};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};
use tracing::error;

const UNIQUE_VIOLATION: &str = "23505";

fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    match &err {
        sqlx::Error::RowNotFound => RepositoryError::NotFound,
        sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION) => {
            RepositoryError::Conflict
        }
        _ => {
            error!(error = %err, "postgres operation failed");
            RepositoryError::unavailable(err.to_string())
        }
    }
}

fn invalid_data(message: impl Into<String>) -> RepositoryError {
    RepositoryError::unavailable(message)
}

#[derive(Debug, FromRow)]
struct RoomRecord {
    id: String,
    name: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<RoomRecord> for Room {
    type Error = RepositoryError;

    fn try_from(value: RoomRecord) -> Result<Self, Self::Error> {
        Ok(Room {
            id: RoomId::parse(&value.id).map_err(|err| invalid_data(err.to_string()))?,
            name: value.name,
            created_at: value.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct UserRecord {
    id: String,
    display_name: String,
    room_id: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<UserRecord> for User {
    type Error = RepositoryError;

    fn try_from(value: UserRecord) -> Result<Self, Self::Error> {
        Ok(User {
            id: UserId::parse(&value.id).map_err(|err| invalid_data(err.to_string()))?,
            display_name: value.display_name,
            room_id: RoomId::parse(&value.room_id).map_err(|err| invalid_data(err.to_string()))?,
            created_at: value.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct MessageRecord {
    id: String,
    room_id: String,
    user_id: String,
    body: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<MessageRecord> for Message {
    type Error = RepositoryError;

    fn try_from(value: MessageRecord) -> Result<Self, Self::Error> {
        Ok(Message {
            id: MessageId::parse(&value.id).map_err(|err| invalid_data(err.to_string()))?,
            room_id: RoomId::parse(&value.room_id).map_err(|err| invalid_data(err.to_string()))?,
            user_id: UserId::parse(&value.user_id).map_err(|err| invalid_data(err.to_string()))?,
            body: value.body,
            created_at: value.created_at,
        })
    }
}

/// 历史查询的一行：消息本身加上 LEFT JOIN 出来的房间和用户列
#[derive(Debug, FromRow)]
struct HistoryRecord {
    id: String,
    room_id: String,
    user_id: String,
    body: String,
    created_at: DateTime<Utc>,
    room_name: Option<String>,
    room_created_at: Option<DateTime<Utc>>,
    user_display_name: Option<String>,
    user_room_id: Option<String>,
    user_created_at: Option<DateTime<Utc>>,
}

impl TryFrom<HistoryRecord> for MessageView {
    type Error = RepositoryError;

    fn try_from(value: HistoryRecord) -> Result<Self, Self::Error> {
        let room = match (value.room_name, value.room_created_at) {
            (Some(name), Some(created_at)) => Some(Room::try_from(RoomRecord {
                id: value.room_id.clone(),
                name,
                created_at,
            })?),
            _ => None,
        };
        let user = match (value.user_display_name, value.user_room_id, value.user_created_at) {
            (Some(display_name), Some(room_id), Some(created_at)) => {
                Some(User::try_from(UserRecord {
                    id: value.user_id.clone(),
                    display_name,
                    room_id,
                    created_at,
                })?)
            }
            _ => None,
        };
        let message = Message::try_from(MessageRecord {
            id: value.id,
            room_id: value.room_id,
            user_id: value.user_id,
            body: value.body,
            created_at: value.created_at,
        })?;

        Ok(MessageView {
            message,
            room,
            user,
        })
    }
}

/// PostgreSQL 仓储，三类记录共用一个连接池
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RoomRepository for PgStore {
    async fn create(&self, room: NewRoom) -> RepositoryResult<Room> {
        let now = Utc::now();
        let record = sqlx::query_as::<_, RoomRecord>(
            r#"
            INSERT INTO rooms (id, name, created_at)
            VALUES ($1, $2, $3)
            RETURNING id, name, created_at
            "#,
        )
        .bind(RoomId::generate(now).as_str())
        .bind(room.name)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Room::try_from(record)
    }

    async fn list(&self) -> RepositoryResult<Vec<Room>> {
        let records = sqlx::query_as::<_, RoomRecord>(
            "SELECT id, name, created_at FROM rooms ORDER BY created_at, id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        records.into_iter().map(Room::try_from).collect()
    }

    async fn find_by_id(&self, id: &RoomId) -> RepositoryResult<Option<Room>> {
        let record = sqlx::query_as::<_, RoomRecord>(
            "SELECT id, name, created_at FROM rooms WHERE id = $1",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(Room::try_from).transpose()
    }
}

#[async_trait]
impl UserRepository for PgStore {
    async fn create(&self, user: NewUser) -> RepositoryResult<User> {
        let now = Utc::now();
        let record = sqlx::query_as::<_, UserRecord>(
            r#"
            INSERT INTO users (id, display_name, room_id, created_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id, display_name, room_id, created_at
            "#,
        )
        .bind(UserId::generate(now).as_str())
        .bind(user.display_name)
        .bind(user.room_id.as_str())
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        User::try_from(record)
    }

    async fn find_by_id(&self, id: &UserId) -> RepositoryResult<Option<User>> {
        let record = sqlx::query_as::<_, UserRecord>(
            "SELECT id, display_name, room_id, created_at FROM users WHERE id = $1",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(User::try_from).transpose()
    }

    async fn list_by_room(&self, room_id: &RoomId) -> RepositoryResult<Vec<User>> {
        let records = sqlx::query_as::<_, UserRecord>(
            r#"
            SELECT id, display_name, room_id, created_at
            FROM users
            WHERE room_id = $1
            ORDER BY created_at, id
            "#,
        )
        .bind(room_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        records.into_iter().map(User::try_from).collect()
    }

    async fn delete(&self, id: &UserId) -> RepositoryResult<Option<User>> {
        let record = sqlx::query_as::<_, UserRecord>(
            "DELETE FROM users WHERE id = $1 RETURNING id, display_name, room_id, created_at",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(User::try_from).transpose()
    }
}

#[async_trait]
impl MessageRepository for PgStore {
    async fn create(&self, message: NewMessage) -> RepositoryResult<Message> {
        let now = Utc::now();
        let record = sqlx::query_as::<_, MessageRecord>(
            r#"
            INSERT INTO messages (id, room_id, user_id, body, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, room_id, user_id, body, created_at
            "#,
        )
        .bind(MessageId::generate(now).as_str())
        .bind(message.room_id.as_str())
        .bind(message.user_id.as_str())
        .bind(message.body)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Message::try_from(record)
    }

    async fn history(&self, room_id: &RoomId) -> RepositoryResult<Vec<MessageView>> {
        let records = sqlx::query_as::<_, HistoryRecord>(
            r#"
            SELECT m.id, m.room_id, m.user_id, m.body, m.created_at,
                   r.name AS room_name, r.created_at AS room_created_at,
                   u.display_name AS user_display_name, u.room_id AS user_room_id,
                   u.created_at AS user_created_at
            FROM messages m
            LEFT JOIN rooms r ON r.id = m.room_id
            LEFT JOIN users u ON u.id = m.user_id
            WHERE m.room_id = $1
            ORDER BY m.created_at, m.seq
            "#,
        )
        .bind(room_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        records.into_iter().map(MessageView::try_from).collect()
    }
}

pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}
