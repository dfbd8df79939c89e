use sqlx::migrate::Migrator;

/// 工作区根目录 `migrations/` 下的 SQL 迁移
pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");
