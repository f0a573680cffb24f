//! SQLite 数据库工具：统一创建连接池
//!
//! 聊天记录按会话动态建表，没有固定 schema，因此这里不跑迁移，
//! 建表交给 `ShardRegistry` 在首次访问时完成。

use crate::im::error::{OpContext, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

fn is_memory_url(db_url: &str) -> bool {
    db_url.contains(":memory:") || db_url.contains("mode=memory")
}

/// 创建 SQLite 连接池
///
/// 内存库每个连接都是独立的数据库，所以强制只用一个常驻连接。
pub async fn create_sqlite_pool(db_url: &str, max_connections: u32) -> Result<Pool<Sqlite>> {
    let memory = is_memory_url(db_url);
    let mut options = SqliteConnectOptions::from_str(db_url)
        .op("ParseDatabaseUrl")?
        .create_if_missing(true);
    if !memory {
        options = options.journal_mode(SqliteJournalMode::Wal);
    }

    let pool_options = if memory {
        SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
    } else {
        SqlitePoolOptions::new().max_connections(max_connections.max(1))
    };

    let pool = pool_options
        .connect_with(options)
        .await
        .op("ConnectDatabase")?;
    info!(
        "[DB] SQLite 连接池已创建: {} (memory={})",
        db_url, memory
    );
    Ok(pool)
}
