//! 会话分表管理
//!
//! 每个会话一张聊天记录表（`chat_logs_<转义后的会话 ID>`），首次访问时建表。
//! 建表状态缓存在按会话 ID 划分的 OnceCell 里：同一会话的并发调用只会有一个真正建表，
//! 不同会话之间互不阻塞。

use crate::im::constant::CHAT_LOG_TABLE_PREFIX;
use crate::im::error::{OpContext, Result, StoreError};
use sqlx::{Pool, Sqlite};
use std::collections::HashMap;
use std::fmt::Write;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// 会话 ID 转表名
///
/// 小写字母和数字原样保留，`_` 变成 `__`，其余字节（包括大写字母，SQLite 表名不区分大小写）
/// 变成 `_xx` 十六进制。该映射是单射，不同会话不会落到同一张表。
pub fn table_name(conversation_id: &str) -> String {
    let mut name = String::with_capacity(CHAT_LOG_TABLE_PREFIX.len() + conversation_id.len());
    name.push_str(CHAT_LOG_TABLE_PREFIX);
    for b in conversation_id.bytes() {
        match b {
            b'0'..=b'9' | b'a'..=b'z' => name.push(b as char),
            b'_' => name.push_str("__"),
            other => {
                let _ = write!(name, "_{:02x}", other);
            }
        }
    }
    name
}

fn schema_statements(table: &str) -> [String; 5] {
    [
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS "{table}" (
                client_msg_id         TEXT PRIMARY KEY NOT NULL,
                server_msg_id         TEXT NOT NULL DEFAULT '',
                send_id               TEXT NOT NULL DEFAULT '',
                recv_id               TEXT NOT NULL DEFAULT '',
                sender_platform_id    INTEGER NOT NULL DEFAULT 0,
                sender_nickname       TEXT NOT NULL DEFAULT '',
                sender_face_url       TEXT NOT NULL DEFAULT '',
                session_type          INTEGER NOT NULL DEFAULT 0,
                msg_from              INTEGER NOT NULL DEFAULT 0,
                content_type          INTEGER NOT NULL DEFAULT 0,
                content               TEXT NOT NULL DEFAULT '',
                is_read               INTEGER NOT NULL DEFAULT 0,
                status                INTEGER NOT NULL DEFAULT 0,
                seq                   INTEGER NOT NULL DEFAULT 0,
                send_time             INTEGER NOT NULL DEFAULT 0,
                create_time           INTEGER NOT NULL DEFAULT 0,
                attached_info         TEXT NOT NULL DEFAULT '',
                ex                    TEXT NOT NULL DEFAULT '',
                local_ex              TEXT NOT NULL DEFAULT ''
            )
            "#
        ),
        format!(r#"CREATE INDEX IF NOT EXISTS "idx_{table}_seq" ON "{table}"(seq)"#),
        format!(r#"CREATE INDEX IF NOT EXISTS "idx_{table}_send_time" ON "{table}"(send_time)"#),
        format!(
            r#"CREATE INDEX IF NOT EXISTS "idx_{table}_content_type" ON "{table}"(content_type)"#
        ),
        format!(r#"CREATE INDEX IF NOT EXISTS "idx_{table}_send_id" ON "{table}"(send_id)"#),
    ]
}

pub struct ShardRegistry {
    pool: Pool<Sqlite>,
    shards: Mutex<HashMap<String, Arc<OnceCell<String>>>>,
}

impl ShardRegistry {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self {
            pool,
            shards: Mutex::new(HashMap::new()),
        }
    }

    /// 确保会话分表存在，返回表名；已存在时不做任何事
    pub async fn ensure(&self, conversation_id: &str) -> Result<String> {
        if conversation_id.is_empty() {
            return Err(StoreError::QueryBuild("empty conversation id".to_string()));
        }
        let cell = {
            let mut shards = self.shards.lock().unwrap_or_else(PoisonError::into_inner);
            shards
                .entry(conversation_id.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };
        let table = cell
            .get_or_try_init(|| self.create(conversation_id))
            .await?;
        Ok(table.clone())
    }

    /// 建表和建索引放在一个事务里，失败不会留下半张表
    async fn create(&self, conversation_id: &str) -> Result<String> {
        let table = table_name(conversation_id);
        let schema_err = |source: sqlx::Error| StoreError::SchemaCreation {
            conversation_id: conversation_id.to_string(),
            source,
        };

        debug!("[ShardRegistry] 检查/创建分表: {} -> {}", conversation_id, table);
        let mut tx = self.pool.begin().await.map_err(schema_err)?;
        for stmt in schema_statements(&table) {
            sqlx::query(&stmt)
                .execute(&mut *tx)
                .await
                .map_err(schema_err)?;
        }
        tx.commit().await.map_err(schema_err)?;

        info!("[ShardRegistry] 分表就绪: {}", table);
        Ok(table)
    }

    /// 是否已在本进程内确认过该分表
    pub fn is_cached(&self, conversation_id: &str) -> bool {
        let shards = self.shards.lock().unwrap_or_else(PoisonError::into_inner);
        shards
            .get(conversation_id)
            .map(|cell| cell.initialized())
            .unwrap_or(false)
    }

    /// 删除缓存项（表被删除后调用）
    pub fn forget(&self, conversation_id: &str) {
        let mut shards = self.shards.lock().unwrap_or_else(PoisonError::into_inner);
        shards.remove(conversation_id);
    }

    /// 直接查 sqlite_master，不走缓存
    pub async fn shard_exists(&self, conversation_id: &str) -> Result<bool> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?")
                .bind(table_name(conversation_id))
                .fetch_one(&self.pool)
                .await
                .op("HasTable")?;
        Ok(count > 0)
    }
}
