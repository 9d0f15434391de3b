//! 出站通知事件定义
//!
//! 每个事件在连接上以 `{"event": <名称>, "data": <载荷>}` 的形式发送。

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::entities::unread::ConversationSummary;
use crate::value_objects::{ConversationId, MessageId, Timestamp, UserId};

/// 内置事件名称
pub mod event_names {
    pub const CONNECTION_SUCCESS: &str = "connection_success";
    pub const MESSAGE_READ_RECEIPT: &str = "message_read_receipt";
    pub const UNREAD_COUNT_UPDATE: &str = "unread_count_update";
    pub const FORCE_LOGOUT: &str = "force_logout";
    pub const GLOBAL_FORCE_LOGOUT: &str = "global_force_logout";
    pub const ERROR: &str = "error";
    pub const PONG: &str = "pong";
}

/// 强制下线时未给出原因使用的默认文案
pub const DEFAULT_FORCE_LOGOUT_REASON: &str = "Your account has been locked";

/// 发往某条连接的一个事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundEvent {
    #[serde(rename = "event")]
    pub name: String,
    #[serde(default)]
    pub data: JsonValue,
}

impl OutboundEvent {
    pub fn new(name: impl Into<String>, data: JsonValue) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    /// 序列化为 WebSocket 文本帧
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// 有固定事件名称的载荷
pub trait ServerEvent: Serialize {
    const NAME: &'static str;

    fn to_event(&self) -> Result<OutboundEvent, serde_json::Error> {
        Ok(OutboundEvent::new(Self::NAME, serde_json::to_value(self)?))
    }
}

/// 握手成功确认
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionSuccess {
    pub user_id: UserId,
    pub connected_at: Timestamp,
    pub server_time: Timestamp,
}

impl ServerEvent for ConnectionSuccess {
    const NAME: &'static str = event_names::CONNECTION_SUCCESS;
}

/// 已读回执，发给消息的发送者
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageReadReceipt {
    pub conversation_id: ConversationId,
    pub reader_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_ids: Option<Vec<MessageId>>,
    pub read_at: Timestamp,
}

impl ServerEvent for MessageReadReceipt {
    const NAME: &'static str = event_names::MESSAGE_READ_RECEIPT;
}

/// 未读数快照推送
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnreadCountUpdate {
    pub user_id: UserId,
    pub total_unread: i64,
    pub conversations: Vec<ConversationSummary>,
    pub timestamp: Timestamp,
}

impl ServerEvent for UnreadCountUpdate {
    const NAME: &'static str = event_names::UNREAD_COUNT_UPDATE;
}

/// 通知优先级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationPriority {
    Normal,
    High,
}

/// 强制下线，直接发给目标连接
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForceLogout {
    pub user_id: UserId,
    pub reason: String,
    pub timestamp: Timestamp,
    pub priority: NotificationPriority,
    pub force: bool,
}

impl ForceLogout {
    pub fn new(user_id: UserId, reason: impl Into<String>, timestamp: Timestamp) -> Self {
        Self {
            user_id,
            reason: reason.into(),
            timestamp,
            priority: NotificationPriority::High,
            force: true,
        }
    }
}

impl ServerEvent for ForceLogout {
    const NAME: &'static str = event_names::FORCE_LOGOUT;
}

/// 强制下线广播，同一广播组内的其他连接都会收到
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalForceLogout {
    pub target_user_id: UserId,
    pub reason: String,
    pub timestamp: Timestamp,
}

impl ServerEvent for GlobalForceLogout {
    const NAME: &'static str = event_names::GLOBAL_FORCE_LOGOUT;
}

/// 拒绝入站信号时回给发送者的错误
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub message: String,
}

impl ErrorEvent {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl ServerEvent for ErrorEvent {
    const NAME: &'static str = event_names::ERROR;
}

/// 心跳回应
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pong {
    pub timestamp: Timestamp,
    pub server_time: Timestamp,
    pub user_id: UserId,
}

impl ServerEvent for Pong {
    const NAME: &'static str = event_names::PONG;
}
