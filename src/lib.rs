pub mod im;

// 重新导出常用类型，方便外部使用
pub use im::{
    error::{Result, StoreError},
    message::{
        AckFields, FilterBuilder, KeywordMatch, LocalChatLog, LockMode, MessagePatch,
        MessageStore, StoreConfig, TimeRange,
    },
};
