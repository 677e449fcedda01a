use std::sync::Arc;

use domain::{MessageRepository, RoomRepository, UserRepository};
use thiserror::Error;
use tracing::info;

use crate::{
    memory::MemoryStore,
    migrations::MIGRATOR,
    postgres::{create_pg_pool, PgStore},
};

#[derive(Debug, Error)]
pub enum InfrastructureError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// 选定的存储后端，以三个仓储接口的形式交给应用层
#[derive(Clone)]
pub struct Storage {
    pub room_repository: Arc<dyn RoomRepository>,
    pub user_repository: Arc<dyn UserRepository>,
    pub message_repository: Arc<dyn MessageRepository>,
}

impl Storage {
    pub fn in_memory() -> Self {
        let store = Arc::new(MemoryStore::new());
        info!("using in-memory document store");
        Self {
            room_repository: store.clone(),
            user_repository: store.clone(),
            message_repository: store,
        }
    }

    /// 连接 PostgreSQL 并执行迁移
    pub async fn connect_postgres(
        database_url: &str,
        max_connections: u32,
    ) -> Result<Self, InfrastructureError> {
        let pool = create_pg_pool(database_url, max_connections).await?;
        MIGRATOR.run(&pool).await?;
        info!(max_connections, "connected to postgres, migrations applied");

        let store = Arc::new(PgStore::new(pool));
        Ok(Self {
            room_repository: store.clone(),
            user_repository: store.clone(),
            message_repository: store,
        })
    }
}
