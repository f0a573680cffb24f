//! 消息存储相关常量（取值与服务端协议保持一致）

/// 发送中
pub const MSG_STATUS_SENDING: i32 = 1;
/// 发送成功
pub const MSG_STATUS_SEND_SUCCESS: i32 = 2;
/// 发送失败
pub const MSG_STATUS_SEND_FAILED: i32 = 3;
/// 已删除（软删除，行保留）
pub const MSG_STATUS_HAS_DELETED: i32 = 4;

/// 关键词匹配：任意一个
pub const KEYWORD_MATCH_OR: i32 = 0;
/// 关键词匹配：全部
pub const KEYWORD_MATCH_AND: i32 = 1;

// 消息内容类型
pub const TEXT: i32 = 101;
pub const PICTURE: i32 = 102;
pub const SOUND: i32 = 103;
pub const VIDEO: i32 = 104;
pub const FILE: i32 = 105;
pub const AT_TEXT: i32 = 106;
pub const MERGER: i32 = 107;
pub const CARD: i32 = 108;
pub const LOCATION: i32 = 109;
pub const CUSTOM: i32 = 110;
pub const QUOTE: i32 = 114;
pub const ADVANCED_TEXT: i32 = 117;

/// 分表名前缀
pub const CHAT_LOG_TABLE_PREFIX: &str = "chat_logs_";
