//! 搜索过滤条件构造
//!
//! 过滤条件用类型化的谓词树表示，执行时编译成带 `?` 占位符的 SQL 和按序绑定的参数。
//! 关键词等用户输入只会出现在绑定参数里，不会拼进 SQL 文本。

use crate::im::constant::{KEYWORD_MATCH_AND, KEYWORD_MATCH_OR, MSG_STATUS_SEND_FAILED};
use crate::im::error::{Result, StoreError};
use sqlx::query::Query;
use sqlx::sqlite::SqliteArguments;
use sqlx::Sqlite;

/// 绑定参数
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    I32(i32),
    I64(i64),
    Str(String),
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::I32(v)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::I64(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Str(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Str(v)
    }
}

/// 谓词可引用的列
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    ClientMsgId,
    Seq,
    SendId,
    SendTime,
    Status,
    ContentType,
    Content,
    IsRead,
}

impl Column {
    pub fn as_str(self) -> &'static str {
        match self {
            Column::ClientMsgId => "client_msg_id",
            Column::Seq => "seq",
            Column::SendId => "send_id",
            Column::SendTime => "send_time",
            Column::Status => "status",
            Column::ContentType => "content_type",
            Column::Content => "content",
            Column::IsRead => "is_read",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cmp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Cmp {
    fn as_str(self) -> &'static str {
        match self {
            Cmp::Eq => "=",
            Cmp::Ne => "!=",
            Cmp::Lt => "<",
            Cmp::Le => "<=",
            Cmp::Gt => ">",
            Cmp::Ge => ">=",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare(Column, Cmp, SqlValue),
    In(Column, Vec<SqlValue>),
    /// 闭区间
    Between(Column, SqlValue, SqlValue),
    /// 区分大小写的子串匹配
    Contains(Column, String),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

impl Predicate {
    pub fn eq(col: Column, v: impl Into<SqlValue>) -> Self {
        Predicate::Compare(col, Cmp::Eq, v.into())
    }

    pub fn cmp(col: Column, op: Cmp, v: impl Into<SqlValue>) -> Self {
        Predicate::Compare(col, op, v.into())
    }

    pub fn is_in<V: Into<SqlValue>>(col: Column, values: impl IntoIterator<Item = V>) -> Self {
        Predicate::In(col, values.into_iter().map(Into::into).collect())
    }

    /// 编译成 WHERE 子句正文和绑定参数
    pub fn compile(&self) -> (String, Vec<SqlValue>) {
        let mut sql = String::new();
        let mut binds = Vec::new();
        self.write_sql(&mut sql, &mut binds);
        (sql, binds)
    }

    fn write_sql(&self, sql: &mut String, binds: &mut Vec<SqlValue>) {
        match self {
            Predicate::Compare(col, op, v) => {
                sql.push_str(col.as_str());
                sql.push(' ');
                sql.push_str(op.as_str());
                sql.push_str(" ?");
                binds.push(v.clone());
            }
            Predicate::In(_, values) if values.is_empty() => sql.push_str("1 = 0"),
            Predicate::In(col, values) => {
                sql.push_str(col.as_str());
                sql.push_str(" IN (");
                sql.push_str(&vec!["?"; values.len()].join(","));
                sql.push(')');
                binds.extend(values.iter().cloned());
            }
            Predicate::Between(col, lo, hi) => {
                sql.push_str(col.as_str());
                sql.push_str(" BETWEEN ? AND ?");
                binds.push(lo.clone());
                binds.push(hi.clone());
            }
            Predicate::Contains(col, needle) => {
                // instr 区分大小写，且不会把 % _ 当通配符
                sql.push_str("instr(");
                sql.push_str(col.as_str());
                sql.push_str(", ?) > 0");
                binds.push(SqlValue::Str(needle.clone()));
            }
            Predicate::And(children) => Self::write_group(children, " AND ", "1 = 1", sql, binds),
            Predicate::Or(children) => Self::write_group(children, " OR ", "1 = 0", sql, binds),
        }
    }

    fn write_group(
        children: &[Predicate],
        connective: &str,
        empty: &str,
        sql: &mut String,
        binds: &mut Vec<SqlValue>,
    ) {
        if children.is_empty() {
            sql.push_str(empty);
            return;
        }
        for (i, child) in children.iter().enumerate() {
            if i > 0 {
                sql.push_str(connective);
            }
            sql.push('(');
            child.write_sql(sql, binds);
            sql.push(')');
        }
    }
}

/// 按顺序绑定参数
pub(crate) fn bind_values<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    values: Vec<SqlValue>,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for value in values {
        query = match value {
            SqlValue::I32(v) => query.bind(v),
            SqlValue::I64(v) => query.bind(v),
            SqlValue::Str(v) => query.bind(v),
        };
    }
    query
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeywordMatch {
    #[default]
    Or,
    And,
}

impl TryFrom<i32> for KeywordMatch {
    type Error = StoreError;

    fn try_from(v: i32) -> Result<Self> {
        match v {
            KEYWORD_MATCH_OR => Ok(KeywordMatch::Or),
            KEYWORD_MATCH_AND => Ok(KeywordMatch::And),
            other => Err(StoreError::QueryBuild(format!(
                "unknown keyword match type {}",
                other
            ))),
        }
    }
}

/// send_time 闭区间
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: i64,
    pub end: i64,
}

impl TimeRange {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    /// 不限时间，负的 send_time 也包含在内
    pub fn all() -> Self {
        Self {
            start: i64::MIN,
            end: i64::MAX,
        }
    }
}

/// 搜索条件构造器
///
/// 产出 `content_type IN (..) AND send_time BETWEEN .. AND status <= 发送失败 AND (关键词组)`。
#[derive(Debug, Clone)]
pub struct FilterBuilder {
    content_types: Vec<i32>,
    range: TimeRange,
    status_ceiling: i32,
    keywords: Vec<String>,
    match_mode: KeywordMatch,
}

impl Default for FilterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FilterBuilder {
    pub fn new() -> Self {
        Self {
            content_types: Vec::new(),
            range: TimeRange::all(),
            status_ceiling: MSG_STATUS_SEND_FAILED,
            keywords: Vec::new(),
            match_mode: KeywordMatch::Or,
        }
    }

    /// 为空表示不限制类型
    pub fn content_types(mut self, types: &[i32]) -> Self {
        self.content_types = types.to_vec();
        self
    }

    pub fn time_range(mut self, range: TimeRange) -> Self {
        self.range = range;
        self
    }

    pub fn keywords<S: AsRef<str>>(mut self, keywords: &[S], mode: KeywordMatch) -> Self {
        self.keywords = keywords
            .iter()
            .map(|k| k.as_ref().to_string())
            .filter(|k| !k.is_empty())
            .collect();
        self.match_mode = mode;
        self
    }

    pub fn build(self) -> Result<Predicate> {
        if self.range.start > self.range.end {
            return Err(StoreError::QueryBuild(format!(
                "send_time range start {} is after end {}",
                self.range.start, self.range.end
            )));
        }

        let mut clauses = Vec::with_capacity(4);
        if !self.content_types.is_empty() {
            clauses.push(Predicate::is_in(Column::ContentType, self.content_types));
        }
        clauses.push(Predicate::Between(
            Column::SendTime,
            self.range.start.into(),
            self.range.end.into(),
        ));
        clauses.push(Predicate::cmp(Column::Status, Cmp::Le, self.status_ceiling));

        if !self.keywords.is_empty() {
            let group: Vec<Predicate> = self
                .keywords
                .into_iter()
                .map(|k| Predicate::Contains(Column::Content, k))
                .collect();
            clauses.push(match self.match_mode {
                KeywordMatch::Or => Predicate::Or(group),
                KeywordMatch::And => Predicate::And(group),
            });
        }
        Ok(Predicate::And(clauses))
    }
}
