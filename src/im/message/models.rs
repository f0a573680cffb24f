//! 消息本地模型定义

use crate::im::constant::{MSG_STATUS_SENDING, TEXT};
use crate::im::message::filter::SqlValue;
use crate::im::message::guard::LockMode;
use serde::{Deserialize, Serialize};

/// 本地聊天记录结构体（每个会话一张表，conversation_id 不落库，读取时回填）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalChatLog {
    #[serde(rename = "conversationID")]
    pub conversation_id: String,
    #[serde(rename = "clientMsgID")]
    pub client_msg_id: String,
    #[serde(rename = "serverMsgID")]
    pub server_msg_id: String,
    #[serde(rename = "sendID")]
    pub send_id: String,
    #[serde(rename = "recvID")]
    pub recv_id: String,
    #[serde(rename = "senderPlatformID")]
    pub sender_platform_id: i32,
    #[serde(rename = "senderNickname")]
    pub sender_nickname: String,
    #[serde(rename = "senderFaceUrl")]
    pub sender_face_url: String,
    #[serde(rename = "sessionType")]
    pub session_type: i32,
    #[serde(rename = "msgFrom")]
    pub msg_from: i32,
    #[serde(rename = "contentType")]
    pub content_type: i32,
    pub content: String,
    #[serde(rename = "isRead")]
    pub is_read: bool,
    pub status: i32,
    /// 0 表示本地创建、尚未被服务端确认
    pub seq: i64,
    #[serde(rename = "sendTime")]
    pub send_time: i64,
    #[serde(rename = "createTime")]
    pub create_time: i64,
    #[serde(rename = "attachedInfo")]
    pub attached_info: String,
    pub ex: String,
    #[serde(rename = "localEx")]
    pub local_ex: String,
}

impl LocalChatLog {
    /// 构造一条本地发送中的文本消息（seq = 0）
    pub fn text(
        conversation_id: impl Into<String>,
        client_msg_id: impl Into<String>,
        send_id: impl Into<String>,
        content: impl Into<String>,
        send_time: i64,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            client_msg_id: client_msg_id.into(),
            send_id: send_id.into(),
            content_type: TEXT,
            content: content.into(),
            status: MSG_STATUS_SENDING,
            send_time,
            create_time: send_time,
            ..Default::default()
        }
    }
}

/// 部分更新内容：只有 `Some` 的字段会被写入
///
/// seq / server_msg_id / send_time 不在这里，它们只能由 ack 路径修改。
#[derive(Debug, Clone, Default)]
pub struct MessagePatch {
    pub status: Option<i32>,
    pub content_type: Option<i32>,
    pub content: Option<String>,
    pub is_read: Option<bool>,
    pub sender_nickname: Option<String>,
    pub sender_face_url: Option<String>,
    pub attached_info: Option<String>,
    pub ex: Option<String>,
    pub local_ex: Option<String>,
}

impl MessagePatch {
    pub fn is_empty(&self) -> bool {
        self.columns().is_empty()
    }

    /// 转成显式的列清单
    pub(crate) fn columns(&self) -> Vec<(&'static str, SqlValue)> {
        let mut cols = Vec::new();
        if let Some(v) = self.status {
            cols.push(("status", SqlValue::I32(v)));
        }
        if let Some(v) = self.content_type {
            cols.push(("content_type", SqlValue::I32(v)));
        }
        if let Some(v) = &self.content {
            cols.push(("content", SqlValue::Str(v.clone())));
        }
        if let Some(v) = self.is_read {
            cols.push(("is_read", SqlValue::I32(v as i32)));
        }
        if let Some(v) = &self.sender_nickname {
            cols.push(("sender_nickname", SqlValue::Str(v.clone())));
        }
        if let Some(v) = &self.sender_face_url {
            cols.push(("sender_face_url", SqlValue::Str(v.clone())));
        }
        if let Some(v) = &self.attached_info {
            cols.push(("attached_info", SqlValue::Str(v.clone())));
        }
        if let Some(v) = &self.ex {
            cols.push(("ex", SqlValue::Str(v.clone())));
        }
        if let Some(v) = &self.local_ex {
            cols.push(("local_ex", SqlValue::Str(v.clone())));
        }
        cols
    }
}

/// 服务端确认（ack）时回写的字段
#[derive(Debug, Clone)]
pub struct AckFields {
    pub server_msg_id: String,
    pub send_time: i64,
    pub status: i32,
    /// 必须为正数
    pub seq: i64,
}

/// 消息存储配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite 连接 URL，如 "sqlite://chat_logs.db?mode=rwc" 或 "sqlite::memory:"
    pub db_url: String,
    pub max_connections: u32,
    pub lock_mode: LockMode,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_url: "sqlite://chat_logs.db?mode=rwc".to_string(),
            max_connections: 5,
            lock_mode: LockMode::Global,
        }
    }
}

impl StoreConfig {
    pub fn memory() -> Self {
        Self {
            db_url: "sqlite::memory:".to_string(),
            ..Default::default()
        }
    }
}
