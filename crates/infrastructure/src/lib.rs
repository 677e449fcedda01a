//! 基础设施层实现。
//!
//! 提供持久化网关的两个适配器：进程内文档存储和 PostgreSQL 仓储。

pub mod builder;
pub mod memory;
pub mod migrations;
pub mod postgres;

pub use builder::{InfrastructureError, Storage};
pub use memory::MemoryStore;
pub use migrations::MIGRATOR;
pub use postgres::{create_pg_pool, PgStore};
