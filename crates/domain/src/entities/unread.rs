//! 未读数快照

use serde::{Deserialize, Serialize};

use crate::value_objects::{ConversationId, MessageId, Timestamp};

/// 单个会话的未读摘要
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub conversation_id: ConversationId,
    pub unread_count: i64,
    pub last_message_id: Option<MessageId>,
    pub last_message_content: Option<String>,
    pub last_message_time: Option<Timestamp>,
}

/// 用户的未读数快照，不落库。
///
/// `conversations` 按会话最近活跃时间倒序排列，由存储协作方负责排序。
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UnreadSnapshot {
    /// 所有未退出会话中、非本人发送的未读消息总数
    pub total_unread: i64,
    pub conversations: Vec<ConversationSummary>,
}
