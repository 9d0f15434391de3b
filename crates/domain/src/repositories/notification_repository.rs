//! 通知分发所需的存储协作方接口
//!
//! 持久化层只以查询接口的形式出现在这里，实现位于基础设施层。

use async_trait::async_trait;

use crate::entities::UnreadSnapshot;
use crate::errors::RepositoryResult;
use crate::value_objects::{ConversationId, MessageId, Timestamp, UserId};

#[cfg_attr(feature = "testing", mockall::automock)]
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// 存储当前是否可用，交互式操作在查询前先检查
    fn is_available(&self) -> bool;

    /// 主动探测一次存储连通性，更新并返回 `is_available` 的结果
    async fn refresh_availability(&self) -> bool {
        self.is_available()
    }

    /// 存储侧的当前时间。
    ///
    /// 已读时间以存储时钟为准，分发进程与数据库可能不在同一主机或时区。
    async fn current_time(&self) -> RepositoryResult<Timestamp>;

    /// 会话中除 `exclude_user_id` 外的去重发送者，顺序由存储决定
    async fn fetch_message_senders(
        &self,
        conversation_id: ConversationId,
        exclude_user_id: UserId,
    ) -> RepositoryResult<Vec<UserId>>;

    /// 从 `candidates` 中筛出该发送者在该会话里发的消息
    async fn fetch_sender_message_ids(
        &self,
        conversation_id: ConversationId,
        sender_id: UserId,
        candidates: &[MessageId],
    ) -> RepositoryResult<Vec<MessageId>>;

    /// 用户的未读数快照
    async fn fetch_unread_summary(&self, user_id: UserId) -> RepositoryResult<UnreadSnapshot>;
}
