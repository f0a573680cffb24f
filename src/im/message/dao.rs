//! 消息数据访问层（DAO）
//!
//! 负责所有聊天记录相关的数据库操作。每个会话一张表，表由 `ShardRegistry` 在首次访问时创建；
//! 写操作持有写锁，读操作持有读锁（见 `ConcurrencyGuard`）。

use crate::im::constant::MSG_STATUS_HAS_DELETED;
use crate::im::db::create_sqlite_pool;
use crate::im::error::{OpContext, Result, StoreError};
use crate::im::message::filter::{
    bind_values, Cmp, Column, FilterBuilder, KeywordMatch, Predicate, SqlValue, TimeRange,
};
use crate::im::message::guard::{ConcurrencyGuard, LockMode};
use crate::im::message::models::{AckFields, LocalChatLog, MessagePatch, StoreConfig};
use crate::im::message::shard::{table_name, ShardRegistry};
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info};

const COLUMNS: &str = "client_msg_id, server_msg_id, send_id, recv_id, sender_platform_id, \
    sender_nickname, sender_face_url, session_type, msg_from, content_type, content, \
    is_read, status, seq, send_time, create_time, attached_info, ex, local_ex";

/// send_time 相同时按 seq、再按插入顺序排
fn order_by(reverse: bool) -> &'static str {
    if reverse {
        "send_time ASC, seq ASC, rowid ASC"
    } else {
        "send_time DESC, seq DESC, rowid DESC"
    }
}

fn to_i64(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

#[derive(Debug, Clone, Copy)]
struct Page {
    offset: usize,
    count: usize,
}

/// 本地消息存储
pub struct MessageStore {
    pool: Pool<Sqlite>,
    registry: ShardRegistry,
    guard: ConcurrencyGuard,
}

impl MessageStore {
    pub async fn new(config: &StoreConfig) -> Result<Self> {
        let pool = create_sqlite_pool(&config.db_url, config.max_connections).await?;
        Ok(Self::with_pool(pool, config.lock_mode))
    }

    pub fn with_pool(pool: Pool<Sqlite>, lock_mode: LockMode) -> Self {
        info!("[MsgStore] 创建消息存储，锁模式: {:?}", lock_mode);
        Self {
            registry: ShardRegistry::new(pool.clone()),
            guard: ConcurrencyGuard::new(lock_mode),
            pool,
        }
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub fn registry(&self) -> &ShardRegistry {
        &self.registry
    }

    // ---------------------------------------------------------------------
    // 写入
    // ---------------------------------------------------------------------

    fn insert_sql(table: &str) -> String {
        format!(
            r#"INSERT INTO "{table}" ({COLUMNS}) VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?)"#
        )
    }

    fn bind_insert<'q>(
        query: Query<'q, Sqlite, SqliteArguments<'q>>,
        msg: &'q LocalChatLog,
    ) -> Query<'q, Sqlite, SqliteArguments<'q>> {
        query
            .bind(&msg.client_msg_id)
            .bind(&msg.server_msg_id)
            .bind(&msg.send_id)
            .bind(&msg.recv_id)
            .bind(msg.sender_platform_id)
            .bind(&msg.sender_nickname)
            .bind(&msg.sender_face_url)
            .bind(msg.session_type)
            .bind(msg.msg_from)
            .bind(msg.content_type)
            .bind(&msg.content)
            .bind(if msg.is_read { 1 } else { 0 })
            .bind(msg.status)
            .bind(msg.seq)
            .bind(msg.send_time)
            .bind(msg.create_time)
            .bind(&msg.attached_info)
            .bind(&msg.ex)
            .bind(&msg.local_ex)
    }

    fn insert_error(
        source: sqlx::Error,
        op: &'static str,
        conversation_id: &str,
        client_msg_id: &str,
    ) -> StoreError {
        let duplicate = source
            .as_database_error()
            .map(|e| e.is_unique_violation())
            .unwrap_or(false);
        if duplicate {
            StoreError::ConstraintViolation {
                conversation_id: conversation_id.to_string(),
                client_msg_id: client_msg_id.to_string(),
            }
        } else {
            StoreError::Database { op, source }
        }
    }

    /// 插入一条消息；client_msg_id 重复时返回 ConstraintViolation
    pub async fn insert(&self, conversation_id: &str, msg: &LocalChatLog) -> Result<()> {
        let _guard = self.guard.write(conversation_id).await;
        let table = self.registry.ensure(conversation_id).await?;
        let sql = Self::insert_sql(&table);
        Self::bind_insert(sqlx::query(&sql), msg)
            .execute(&self.pool)
            .await
            .map_err(|e| Self::insert_error(e, "InsertMessage", conversation_id, &msg.client_msg_id))?;
        debug!(
            "[MsgStore] 插入消息: conv={}, client_msg_id={}, seq={}",
            conversation_id, msg.client_msg_id, msg.seq
        );
        Ok(())
    }

    /// 批量插入，单个事务内完成，任意一条失败则全部回滚
    pub async fn batch_insert(&self, conversation_id: &str, msgs: &[LocalChatLog]) -> Result<()> {
        if msgs.is_empty() {
            return Ok(());
        }
        let _guard = self.guard.write(conversation_id).await;
        let table = self.registry.ensure(conversation_id).await?;
        let sql = Self::insert_sql(&table);

        let mut tx = self.pool.begin().await.op("BatchInsertMessageList")?;
        for msg in msgs {
            Self::bind_insert(sqlx::query(&sql), msg)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    Self::insert_error(e, "BatchInsertMessageList", conversation_id, &msg.client_msg_id)
                })?;
        }
        tx.commit().await.op("BatchInsertMessageList")?;

        debug!(
            "[MsgStore] 批量插入消息: conv={}, count={}",
            conversation_id,
            msgs.len()
        );
        Ok(())
    }

    /// 按条件执行 UPDATE，返回影响行数
    async fn update_rows(
        &self,
        conversation_id: &str,
        columns: Vec<(&'static str, SqlValue)>,
        filter: &Predicate,
        op: &'static str,
    ) -> Result<u64> {
        let _guard = self.guard.write(conversation_id).await;
        let table = self.registry.ensure(conversation_id).await?;

        let set_sql = columns
            .iter()
            .map(|(col, _)| format!("{col} = ?"))
            .collect::<Vec<_>>()
            .join(", ");
        let mut binds: Vec<SqlValue> = columns.into_iter().map(|(_, v)| v).collect();
        let (where_sql, where_binds) = filter.compile();
        binds.extend(where_binds);

        let sql = format!(r#"UPDATE "{table}" SET {set_sql} WHERE {where_sql}"#);
        let res = bind_values(sqlx::query(&sql), binds)
            .execute(&self.pool)
            .await
            .op(op)?;
        debug!(
            "[MsgStore] {}: conv={}, rows_affected={}",
            op,
            conversation_id,
            res.rows_affected()
        );
        Ok(res.rows_affected())
    }

    async fn update_one(
        &self,
        conversation_id: &str,
        filter: Predicate,
        patch: &MessagePatch,
        op: &'static str,
    ) -> Result<()> {
        if patch.is_empty() {
            return Err(StoreError::QueryBuild(format!("{op}: empty patch")));
        }
        let affected = self
            .update_rows(conversation_id, patch.columns(), &filter, op)
            .await?;
        if affected == 0 {
            return Err(StoreError::NoRowsAffected {
                op,
                conversation_id: conversation_id.to_string(),
            });
        }
        Ok(())
    }

    /// 按 client_msg_id 部分更新
    pub async fn update_by_client_id(
        &self,
        conversation_id: &str,
        client_msg_id: &str,
        patch: &MessagePatch,
    ) -> Result<()> {
        let filter = Predicate::eq(Column::ClientMsgId, client_msg_id);
        self.update_one(conversation_id, filter, patch, "UpdateMessage")
            .await
    }

    /// 按 seq 部分更新；seq 必须为正数（seq = 0 的消息尚未确认，不能作为定位键）
    pub async fn update_by_seq(
        &self,
        conversation_id: &str,
        seq: i64,
        patch: &MessagePatch,
    ) -> Result<()> {
        if seq <= 0 {
            return Err(StoreError::QueryBuild(format!(
                "UpdateMessageBySeq: invalid seq {seq}"
            )));
        }
        let filter = Predicate::eq(Column::Seq, seq);
        self.update_one(conversation_id, filter, patch, "UpdateMessageBySeq")
            .await
    }

    /// 服务端确认：只作用于 seq = 0 的行，是消息离开"未确认"状态的唯一途径
    pub async fn set_ack_fields(
        &self,
        conversation_id: &str,
        client_msg_id: &str,
        ack: &AckFields,
    ) -> Result<()> {
        const OP: &str = "UpdateMessageTimeAndStatus";
        if ack.seq <= 0 {
            return Err(StoreError::QueryBuild(format!(
                "{OP}: ack seq must be positive, got {}",
                ack.seq
            )));
        }
        let columns = vec![
            ("server_msg_id", SqlValue::Str(ack.server_msg_id.clone())),
            ("send_time", SqlValue::I64(ack.send_time)),
            ("status", SqlValue::I32(ack.status)),
            ("seq", SqlValue::I64(ack.seq)),
        ];
        let filter = Predicate::And(vec![
            Predicate::eq(Column::ClientMsgId, client_msg_id),
            Predicate::eq(Column::Seq, 0i64),
        ]);
        let affected = self
            .update_rows(conversation_id, columns, &filter, OP)
            .await?;
        if affected == 0 {
            return Err(StoreError::NoRowsAffected {
                op: OP,
                conversation_id: conversation_id.to_string(),
            });
        }
        Ok(())
    }

    /// 批量更新某个发送者的头像和昵称快照，返回影响行数
    pub async fn patch_sender_profile(
        &self,
        conversation_id: &str,
        send_id: &str,
        face_url: &str,
        nickname: &str,
    ) -> Result<u64> {
        let columns = vec![
            ("sender_face_url", SqlValue::from(face_url)),
            ("sender_nickname", SqlValue::from(nickname)),
        ];
        let filter = Predicate::eq(Column::SendId, send_id);
        self.update_rows(
            conversation_id,
            columns,
            &filter,
            "UpdateMsgSenderFaceURLAndSenderNickname",
        )
        .await
    }

    /// 标记他人发送的消息为已读（自己发的跳过），返回影响行数
    pub async fn mark_as_read_by_client_ids(
        &self,
        conversation_id: &str,
        client_msg_ids: &[String],
        login_user_id: &str,
    ) -> Result<u64> {
        if client_msg_ids.is_empty() {
            return Ok(0);
        }
        let filter = Predicate::And(vec![
            Predicate::is_in(Column::ClientMsgId, client_msg_ids.iter().map(String::as_str)),
            Predicate::cmp(Column::SendId, Cmp::Ne, login_user_id),
        ]);
        self.update_rows(
            conversation_id,
            vec![("is_read", SqlValue::I32(1))],
            &filter,
            "MarkConversationMessageAsRead",
        )
        .await
    }

    // ---------------------------------------------------------------------
    // 删除
    // ---------------------------------------------------------------------

    async fn delete_rows(
        &self,
        conversation_id: &str,
        filter: &Predicate,
        op: &'static str,
    ) -> Result<u64> {
        let _guard = self.guard.write(conversation_id).await;
        let table = self.registry.ensure(conversation_id).await?;
        let (where_sql, binds) = filter.compile();
        let sql = format!(r#"DELETE FROM "{table}" WHERE {where_sql}"#);
        let res = bind_values(sqlx::query(&sql), binds)
            .execute(&self.pool)
            .await
            .op(op)?;
        debug!(
            "[MsgStore] {}: conv={}, deleted={}",
            op,
            conversation_id,
            res.rows_affected()
        );
        Ok(res.rows_affected())
    }

    /// 物理删除会话内全部消息
    pub async fn delete_all(&self, conversation_id: &str) -> Result<u64> {
        self.delete_rows(
            conversation_id,
            &Predicate::And(vec![]),
            "DeleteConversationAllMessages",
        )
        .await
    }

    /// 软删除：状态置为已删除，行保留
    pub async fn soft_delete_all(&self, conversation_id: &str) -> Result<u64> {
        self.update_rows(
            conversation_id,
            vec![("status", SqlValue::I32(MSG_STATUS_HAS_DELETED))],
            &Predicate::And(vec![]),
            "MarkDeleteConversationAllMessages",
        )
        .await
    }

    /// 按 client_msg_id 软删除，返回影响行数
    pub async fn soft_delete_by_client_ids(
        &self,
        conversation_id: &str,
        client_msg_ids: &[String],
    ) -> Result<u64> {
        if client_msg_ids.is_empty() {
            return Ok(0);
        }
        let filter = Predicate::is_in(Column::ClientMsgId, client_msg_ids.iter().map(String::as_str));
        self.update_rows(
            conversation_id,
            vec![("status", SqlValue::I32(MSG_STATUS_HAS_DELETED))],
            &filter,
            "MarkDeleteConversationMsgs",
        )
        .await
    }

    pub async fn delete_by_client_ids(
        &self,
        conversation_id: &str,
        client_msg_ids: &[String],
    ) -> Result<u64> {
        if client_msg_ids.is_empty() {
            return Ok(0);
        }
        let filter = Predicate::is_in(Column::ClientMsgId, client_msg_ids.iter().map(String::as_str));
        self.delete_rows(conversation_id, &filter, "DeleteConversationMsgs")
            .await
    }

    pub async fn delete_by_seqs(&self, conversation_id: &str, seqs: &[i64]) -> Result<u64> {
        if seqs.is_empty() {
            return Ok(0);
        }
        let filter = Predicate::is_in(Column::Seq, seqs.iter().copied());
        self.delete_rows(conversation_id, &filter, "DeleteConversationMsgsBySeqs")
            .await
    }

    /// 删除整个会话分表
    pub async fn drop_conversation(&self, conversation_id: &str) -> Result<()> {
        let _guard = self.guard.write(conversation_id).await;
        let table = table_name(conversation_id);
        let sql = format!(r#"DROP TABLE IF EXISTS "{table}""#);
        sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .op("DropConversation")?;
        self.registry.forget(conversation_id);
        self.guard.forget(conversation_id);
        info!("[MsgStore] 已删除会话分表: {}", table);
        Ok(())
    }

    // ---------------------------------------------------------------------
    // 读取
    // ---------------------------------------------------------------------

    fn row_to_log(conversation_id: &str, row: &SqliteRow) -> Result<LocalChatLog> {
        let decode = "DecodeChatLog";
        Ok(LocalChatLog {
            conversation_id: conversation_id.to_string(),
            client_msg_id: row.try_get("client_msg_id").op(decode)?,
            server_msg_id: row.try_get("server_msg_id").op(decode)?,
            send_id: row.try_get("send_id").op(decode)?,
            recv_id: row.try_get("recv_id").op(decode)?,
            sender_platform_id: row.try_get("sender_platform_id").op(decode)?,
            sender_nickname: row.try_get("sender_nickname").op(decode)?,
            sender_face_url: row.try_get("sender_face_url").op(decode)?,
            session_type: row.try_get("session_type").op(decode)?,
            msg_from: row.try_get("msg_from").op(decode)?,
            content_type: row.try_get("content_type").op(decode)?,
            content: row.try_get("content").op(decode)?,
            is_read: row.try_get::<i32, _>("is_read").op(decode)? != 0,
            status: row.try_get("status").op(decode)?,
            seq: row.try_get("seq").op(decode)?,
            send_time: row.try_get("send_time").op(decode)?,
            create_time: row.try_get("create_time").op(decode)?,
            attached_info: row.try_get("attached_info").op(decode)?,
            ex: row.try_get("ex").op(decode)?,
            local_ex: row.try_get("local_ex").op(decode)?,
        })
    }

    /// 读锁下查询；所有读操作都走这里
    async fn select(
        &self,
        conversation_id: &str,
        filter: &Predicate,
        reverse: bool,
        page: Option<Page>,
        op: &'static str,
    ) -> Result<Vec<LocalChatLog>> {
        let _guard = self.guard.read(conversation_id).await;
        let table = self.registry.ensure(conversation_id).await?;

        let (where_sql, mut binds) = filter.compile();
        let order = order_by(reverse);
        let mut sql = format!(r#"SELECT {COLUMNS} FROM "{table}" WHERE {where_sql} ORDER BY {order}"#);
        if let Some(page) = page {
            sql.push_str(" LIMIT ? OFFSET ?");
            binds.push(SqlValue::I64(to_i64(page.count)));
            binds.push(SqlValue::I64(to_i64(page.offset)));
        }

        let rows = bind_values(sqlx::query(&sql), binds)
            .fetch_all(&self.pool)
            .await
            .op(op)?;
        let msgs = rows
            .iter()
            .map(|row| Self::row_to_log(conversation_id, row))
            .collect::<Result<Vec<_>>>()?;
        debug!("[MsgStore] {}: conv={}, rows={}", op, conversation_id, msgs.len());
        Ok(msgs)
    }

    async fn select_one(
        &self,
        conversation_id: &str,
        filter: Predicate,
        key: String,
        op: &'static str,
    ) -> Result<LocalChatLog> {
        let page = Page { offset: 0, count: 1 };
        self.select(conversation_id, &filter, false, Some(page), op)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::NotFound {
                conversation_id: conversation_id.to_string(),
                key,
            })
    }

    pub async fn get_by_client_id(
        &self,
        conversation_id: &str,
        client_msg_id: &str,
    ) -> Result<LocalChatLog> {
        self.select_one(
            conversation_id,
            Predicate::eq(Column::ClientMsgId, client_msg_id),
            format!("client_msg_id={client_msg_id}"),
            "GetMessage",
        )
        .await
    }

    pub async fn get_by_seq(&self, conversation_id: &str, seq: i64) -> Result<LocalChatLog> {
        self.select_one(
            conversation_id,
            Predicate::eq(Column::Seq, seq),
            format!("seq={seq}"),
            "GetMessageBySeq",
        )
        .await
    }

    /// 批量按 client_msg_id 取消息（按 send_time 倒序），不存在的 ID 直接忽略
    pub async fn get_by_client_ids(
        &self,
        conversation_id: &str,
        client_msg_ids: &[String],
    ) -> Result<Vec<LocalChatLog>> {
        if client_msg_ids.is_empty() {
            return Ok(vec![]);
        }
        let filter = Predicate::is_in(Column::ClientMsgId, client_msg_ids.iter().map(String::as_str));
        self.select(conversation_id, &filter, false, None, "GetMessagesByClientMsgIDs")
            .await
    }

    pub async fn get_by_seqs(&self, conversation_id: &str, seqs: &[i64]) -> Result<Vec<LocalChatLog>> {
        if seqs.is_empty() {
            return Ok(vec![]);
        }
        let filter = Predicate::is_in(Column::Seq, seqs.iter().copied());
        self.select(conversation_id, &filter, false, None, "GetMessagesBySeqs")
            .await
    }

    /// 最近 count 条消息；reverse 为 true 时按时间正序
    pub async fn list_recent(
        &self,
        conversation_id: &str,
        count: usize,
        reverse: bool,
    ) -> Result<Vec<LocalChatLog>> {
        let page = Page { offset: 0, count };
        self.select(
            conversation_id,
            &Predicate::And(vec![]),
            reverse,
            Some(page),
            "GetMessageListNoTime",
        )
        .await
    }

    /// 以 start_time 为游标分页：正常取更早的（倒序），reverse 取更晚的（正序）
    pub async fn list_before(
        &self,
        conversation_id: &str,
        count: usize,
        start_time: i64,
        reverse: bool,
    ) -> Result<Vec<LocalChatLog>> {
        let cmp = if reverse { Cmp::Gt } else { Cmp::Lt };
        let filter = Predicate::cmp(Column::SendTime, cmp, start_time);
        let page = Page { offset: 0, count };
        self.select(conversation_id, &filter, reverse, Some(page), "GetMessageList")
            .await
    }

    /// 按消息类型分页搜索；content_types 为空时不限制类型
    pub async fn search_by_content_type(
        &self,
        content_types: &[i32],
        conversation_id: &str,
        range: TimeRange,
        offset: usize,
        count: usize,
    ) -> Result<Vec<LocalChatLog>> {
        let filter = FilterBuilder::new()
            .content_types(content_types)
            .time_range(range)
            .build()?;
        self.select(
            conversation_id,
            &filter,
            false,
            Some(Page { offset, count }),
            "SearchMessageByContentType",
        )
        .await
    }

    /// 按关键词分页搜索
    ///
    /// `content_types` 为空表示不限制消息类型（而不是一条都不匹配）；空关键词会被忽略，
    /// 关键词全为空时只按类型、时间和状态过滤。
    #[allow(clippy::too_many_arguments)]
    pub async fn search_by_keyword<S: AsRef<str>>(
        &self,
        content_types: &[i32],
        keywords: &[S],
        match_mode: KeywordMatch,
        conversation_id: &str,
        range: TimeRange,
        offset: usize,
        count: usize,
    ) -> Result<Vec<LocalChatLog>> {
        let filter = FilterBuilder::new()
            .content_types(content_types)
            .time_range(range)
            .keywords(keywords, match_mode)
            .build()?;
        self.select(
            conversation_id,
            &filter,
            false,
            Some(Page { offset, count }),
            "SearchMessageByKeyword",
        )
        .await
    }

    /// 同 search_by_keyword（空类型集同样不限制类型），但不分页
    pub async fn search_all<S: AsRef<str>>(
        &self,
        content_types: &[i32],
        conversation_id: &str,
        keywords: &[S],
        match_mode: KeywordMatch,
        range: TimeRange,
    ) -> Result<Vec<LocalChatLog>> {
        let filter = FilterBuilder::new()
            .content_types(content_types)
            .time_range(range)
            .keywords(keywords, match_mode)
            .build()?;
        self.select(
            conversation_id,
            &filter,
            false,
            None,
            "SearchMessageByContentTypeAndKeyword",
        )
        .await
    }

    pub async fn max_seq(&self, conversation_id: &str) -> Result<i64> {
        let _guard = self.guard.read(conversation_id).await;
        let table = self.registry.ensure(conversation_id).await?;
        let sql = format!(r#"SELECT IFNULL(MAX(seq), 0) FROM "{table}""#);
        let (max_seq,): (i64,) = sqlx::query_as(&sql)
            .fetch_one(&self.pool)
            .await
            .op("GetConversationNormalMsgSeq")?;
        Ok(max_seq)
    }

    pub async fn count(&self, conversation_id: &str) -> Result<i64> {
        let _guard = self.guard.read(conversation_id).await;
        let table = self.registry.ensure(conversation_id).await?;
        let sql = format!(r#"SELECT COUNT(*) FROM "{table}""#);
        let (count,): (i64,) = sqlx::query_as(&sql)
            .fetch_one(&self.pool)
            .await
            .op("CountMessages")?;
        Ok(count)
    }
}
