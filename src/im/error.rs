//! 消息存储错误类型
//!
//! 所有存储引擎错误都带上操作名返回，本层不做任何重试，重试策略交给调用方（如同步引擎）。

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    /// 按主键/seq 查询未命中
    #[error("message not found in {conversation_id}: {key}")]
    NotFound {
        conversation_id: String,
        key: String,
    },

    /// 更新语句没有命中任何行（与 NotFound 区分）
    #[error("{op}: no rows affected in {conversation_id}")]
    NoRowsAffected {
        op: &'static str,
        conversation_id: String,
    },

    /// client_msg_id 在分表内重复
    #[error("duplicate client_msg_id {client_msg_id} in {conversation_id}")]
    ConstraintViolation {
        conversation_id: String,
        client_msg_id: String,
    },

    /// 分表建表失败，对当前操作是致命的
    #[error("create shard for {conversation_id} failed: {source}")]
    SchemaCreation {
        conversation_id: String,
        #[source]
        source: sqlx::Error,
    },

    /// 过滤条件或更新内容不合法
    #[error("invalid query: {0}")]
    QueryBuild(String),

    #[error("{op} failed: {source}")]
    Database {
        op: &'static str,
        #[source]
        source: sqlx::Error,
    },
}

impl StoreError {
    /// 幂等更新的调用方可以把 NoRowsAffected 当成"无事可做"
    pub fn is_no_rows_affected(&self) -> bool {
        matches!(self, StoreError::NoRowsAffected { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// 给 sqlx 错误附加操作名，错误信息形如 "GetMessage failed: ..."
pub(crate) trait OpContext<T> {
    fn op(self, op: &'static str) -> Result<T>;
}

impl<T> OpContext<T> for std::result::Result<T, sqlx::Error> {
    fn op(self, op: &'static str) -> Result<T> {
        self.map_err(|source| StoreError::Database { op, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn op_context_wraps_engine_error() {
        let res: std::result::Result<(), sqlx::Error> = Err(sqlx::Error::RowNotFound);
        let err = res.op("GetMessage").unwrap_err();
        assert!(matches!(err, StoreError::Database { op: "GetMessage", .. }));
        assert!(err.to_string().starts_with("GetMessage failed"));
    }

    #[test]
    fn no_rows_affected_is_distinct_from_not_found() {
        let err = StoreError::NoRowsAffected {
            op: "UpdateMessageBySeq",
            conversation_id: "si_a_b".into(),
        };
        assert!(err.is_no_rows_affected());
        assert!(!err.is_not_found());
    }
}
