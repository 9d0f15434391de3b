use std::sync::Arc;

use domain::{NotificationStore, UnreadCountUpdate, UserId};

use crate::clock::Clock;
use crate::dispatcher::{DispatchOutcome, NotificationDispatcher};

/// 未读数推送
///
/// 由发消息等业务操作在提交后调用，失败只记日志，不影响调用方的结果。
pub struct UnreadAggregator {
    store: Arc<dyn NotificationStore>,
    dispatcher: Arc<NotificationDispatcher>,
    clock: Arc<dyn Clock>,
}

impl UnreadAggregator {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        dispatcher: Arc<NotificationDispatcher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            dispatcher,
            clock,
        }
    }

    pub async fn push_unread_update(&self, user_id: UserId) -> DispatchOutcome {
        let snapshot = match self.store.fetch_unread_summary(user_id).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                tracing::error!(user_id = %user_id, error = %err, "查询未读数失败");
                return DispatchOutcome::StoreFailed;
            }
        };

        let update = UnreadCountUpdate {
            user_id,
            total_unread: snapshot.total_unread,
            conversations: snapshot.conversations,
            timestamp: self.clock.now(),
        };
        self.dispatcher.notify_event(user_id, &update).await
    }
}
