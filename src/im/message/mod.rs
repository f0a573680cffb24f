//! 消息模块
//!
//! 本地聊天记录的存储、分页、搜索与清理

pub mod dao;
pub mod filter;
pub mod guard;
pub mod models;
pub mod shard;

// 重新导出主要类型
pub use dao::MessageStore;
pub use filter::{Cmp, Column, FilterBuilder, KeywordMatch, Predicate, SqlValue, TimeRange};
pub use guard::{ConcurrencyGuard, LockMode};
pub use models::{AckFields, LocalChatLog, MessagePatch, StoreConfig};
pub use shard::{table_name, ShardRegistry};
