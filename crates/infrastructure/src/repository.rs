use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{
    ConversationId, ConversationSummary, MessageId, NotificationStore, RepositoryError,
    RepositoryResult, Timestamp, UnreadSnapshot, UserId,
};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};

fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            RepositoryError::Unavailable
        }
        other => RepositoryError::storage(other.to_string()),
    }
}

fn stored_user_id(raw: i64) -> RepositoryResult<UserId> {
    UserId::new(raw).map_err(|err| RepositoryError::invalid_data(err.to_string()))
}

/// 丢弃无法作为用户标识的行，其余发送者照常返回
fn valid_senders(conversation_id: ConversationId, rows: Vec<i64>) -> Vec<UserId> {
    rows.into_iter()
        .filter_map(|raw| match stored_user_id(raw) {
            Ok(user_id) => Some(user_id),
            Err(err) => {
                tracing::warn!(
                    conversation_id = %conversation_id,
                    sender_id = raw,
                    error = %err,
                    "忽略无效的发送者"
                );
                None
            }
        })
        .collect()
}

#[derive(Debug, FromRow)]
struct ConversationSummaryRecord {
    conversation_id: i64,
    unread_count: i64,
    last_message_id: Option<i64>,
    last_message_content: Option<String>,
    last_message_time: Option<DateTime<Utc>>,
}

impl From<ConversationSummaryRecord> for ConversationSummary {
    fn from(value: ConversationSummaryRecord) -> Self {
        ConversationSummary {
            conversation_id: ConversationId(value.conversation_id),
            unread_count: value.unread_count,
            last_message_id: value.last_message_id.map(MessageId),
            last_message_content: value.last_message_content,
            last_message_time: value.last_message_time,
        }
    }
}

/// Postgres 上的通知存储
///
/// 读取 `messages`、`conversations`、`conversation_members` 三张表，表结构由业务服务维护。
/// 连接类错误会把存储标记为不可用，之后任意一次查询成功再恢复。
#[derive(Clone)]
pub struct PgNotificationStore {
    pool: PgPool,
    available: Arc<AtomicBool>,
}

impl PgNotificationStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn set_available(&self, available: bool) {
        if self.available.swap(available, Ordering::SeqCst) != available {
            if available {
                tracing::info!("数据库连接已恢复");
            } else {
                tracing::error!("数据库连接不可用");
            }
        }
    }

    fn track<T>(&self, result: Result<T, sqlx::Error>) -> RepositoryResult<T> {
        match result {
            Ok(value) => {
                self.set_available(true);
                Ok(value)
            }
            Err(err) => {
                let err = map_sqlx_err(err);
                if err == RepositoryError::Unavailable {
                    self.set_available(false);
                }
                Err(err)
            }
        }
    }
}

#[async_trait]
impl NotificationStore for PgNotificationStore {
    fn is_available(&self) -> bool {
        !self.pool.is_closed() && self.available.load(Ordering::SeqCst)
    }

    async fn refresh_availability(&self) -> bool {
        let result = sqlx::query("SELECT 1").execute(&self.pool).await;
        // 探测只关心连通性，其他错误不影响状态
        let _ = self.track(result);
        self.is_available()
    }

    async fn current_time(&self) -> RepositoryResult<Timestamp> {
        let result = sqlx::query_scalar::<_, DateTime<Utc>>("SELECT NOW()")
            .fetch_one(&self.pool)
            .await;
        self.track(result)
    }

    async fn fetch_message_senders(
        &self,
        conversation_id: ConversationId,
        exclude_user_id: UserId,
    ) -> RepositoryResult<Vec<UserId>> {
        let result = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT DISTINCT sender_id
            FROM messages
            WHERE conversation_id = $1 AND sender_id <> $2
            ORDER BY sender_id
            "#,
        )
        .bind(conversation_id.0)
        .bind(exclude_user_id.value())
        .fetch_all(&self.pool)
        .await;
        let rows = self.track(result)?;

        Ok(valid_senders(conversation_id, rows))
    }

    async fn fetch_sender_message_ids(
        &self,
        conversation_id: ConversationId,
        sender_id: UserId,
        candidates: &[MessageId],
    ) -> RepositoryResult<Vec<MessageId>> {
        let candidates: Vec<i64> = candidates.iter().map(|id| id.0).collect();
        let result = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT message_id
            FROM messages
            WHERE conversation_id = $1 AND sender_id = $2 AND message_id = ANY($3)
            ORDER BY message_id
            "#,
        )
        .bind(conversation_id.0)
        .bind(sender_id.value())
        .bind(&candidates)
        .fetch_all(&self.pool)
        .await;
        let rows = self.track(result)?;

        Ok(rows.into_iter().map(MessageId).collect())
    }

    async fn fetch_unread_summary(&self, user_id: UserId) -> RepositoryResult<UnreadSnapshot> {
        // 只统计未退出的会话里别人发的未读消息
        let result = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM messages m
            JOIN conversation_members cm ON m.conversation_id = cm.conversation_id
            WHERE cm.user_id = $1
              AND m.sender_id <> $1
              AND m.is_read = FALSE
              AND cm.left_at IS NULL
            "#,
        )
        .bind(user_id.value())
        .fetch_one(&self.pool)
        .await;
        let total_unread = self.track(result)?;

        let result = sqlx::query_as::<_, ConversationSummaryRecord>(
            r#"
            SELECT c.conversation_id,
                   (SELECT COUNT(*)
                      FROM messages u
                     WHERE u.conversation_id = c.conversation_id
                       AND u.sender_id <> $1
                       AND u.is_read = FALSE) AS unread_count,
                   last.message_id AS last_message_id,
                   last.content AS last_message_content,
                   last.created_at AS last_message_time
            FROM conversations c
            JOIN conversation_members cm ON cm.conversation_id = c.conversation_id
            LEFT JOIN LATERAL (
                SELECT m.message_id, m.content, m.created_at
                FROM messages m
                WHERE m.conversation_id = c.conversation_id
                ORDER BY m.created_at DESC, m.message_id DESC
                LIMIT 1
            ) last ON TRUE
            WHERE cm.user_id = $1 AND cm.left_at IS NULL
            ORDER BY c.updated_at DESC, c.conversation_id DESC
            "#,
        )
        .bind(user_id.value())
        .fetch_all(&self.pool)
        .await;
        let records = self.track(result)?;

        tracing::debug!(
            user_id = %user_id,
            total_unread,
            conversations = records.len(),
            "未读数快照查询完成"
        );

        Ok(UnreadSnapshot {
            total_unread,
            conversations: records.into_iter().map(ConversationSummary::from).collect(),
        })
    }
}

pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}
