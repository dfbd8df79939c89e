//! 基础设施层实现。
//!
//! 提供消息存储网关的 PostgreSQL 实现、连接池创建和数据库迁移。

pub mod migrations;
pub mod repository;

pub use migrations::MIGRATOR;
pub use repository::{create_pg_pool, PgMessageStore};
