//! 通知分发入口
//!
//! 其他模块向用户推送事件都经过这里。投递是尽力而为的：离线、重复和传输失败
//! 都只体现在返回的 [`DispatchOutcome`] 上，不会作为错误抛给调用方，也不会排队重试。

use std::sync::Arc;

use domain::{OutboundEvent, ServerEvent, UserId};
use serde_json::Value as JsonValue;

use crate::clock::Clock;
use crate::dedup::{DedupCache, Fingerprint};
use crate::registry::ConnectionRegistry;

/// 单次投递结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered,
    /// 去重窗口内已经发过
    Duplicate,
    /// 用户没有存活的连接
    Offline,
    TransportFailed,
    /// 组装载荷时存储查询失败
    StoreFailed,
}

impl DispatchOutcome {
    pub fn is_delivered(self) -> bool {
        matches!(self, DispatchOutcome::Delivered)
    }
}

pub struct NotificationDispatcher {
    registry: Arc<ConnectionRegistry>,
    dedup: Arc<DedupCache>,
    clock: Arc<dyn Clock>,
    digest_len: usize,
}

impl NotificationDispatcher {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        dedup: Arc<DedupCache>,
        clock: Arc<dyn Clock>,
        digest_len: usize,
    ) -> Self {
        Self {
            registry,
            dedup,
            clock,
            digest_len,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn dedup(&self) -> &Arc<DedupCache> {
        &self.dedup
    }

    /// 带去重的推送，只投递给存活的连接
    pub async fn notify(&self, user_id: UserId, event: &str, payload: JsonValue) -> DispatchOutcome {
        let now = self.clock.now();
        let fingerprint = Fingerprint::new(event, user_id, &payload, now, self.digest_len);

        if !self.dedup.try_mark(fingerprint.clone(), now) {
            tracing::warn!(user_id = %user_id, event, "重复通知，已忽略");
            return DispatchOutcome::Duplicate;
        }

        let outcome = self
            .deliver(user_id, OutboundEvent::new(event, payload), true)
            .await;
        // 只有成功投递的通知保留去重记录
        if !outcome.is_delivered() {
            self.dedup.release(&fingerprint);
        }
        outcome
    }

    pub async fn notify_event<E: ServerEvent>(&self, user_id: UserId, event: &E) -> DispatchOutcome {
        match serde_json::to_value(event) {
            Ok(payload) => self.notify(user_id, E::NAME, payload).await,
            Err(err) => {
                tracing::error!(user_id = %user_id, event = E::NAME, error = %err, "通知载荷序列化失败");
                DispatchOutcome::TransportFailed
            }
        }
    }

    /// 不去重、不检查存活，直接发给当前登记的连接
    pub async fn emit_direct(&self, user_id: UserId, event: &str, payload: JsonValue) -> DispatchOutcome {
        self.deliver(user_id, OutboundEvent::new(event, payload), false)
            .await
    }

    async fn deliver(&self, user_id: UserId, event: OutboundEvent, require_live: bool) -> DispatchOutcome {
        let Some(connection) = self.registry.lookup(user_id).await else {
            tracing::warn!(user_id = %user_id, event = %event.name, "用户不在线，通知未发送");
            return DispatchOutcome::Offline;
        };

        if require_live && !connection.is_live() {
            tracing::warn!(user_id = %user_id, event = %event.name, "连接已失效，通知未发送");
            return DispatchOutcome::Offline;
        }

        let name = event.name.clone();
        match connection.handle.emit(event) {
            Ok(()) => {
                tracing::debug!(user_id = %user_id, event = %name, "通知已发送");
                DispatchOutcome::Delivered
            }
            Err(err) => {
                tracing::error!(user_id = %user_id, event = %name, error = %err, "通知发送失败");
                DispatchOutcome::TransportFailed
            }
        }
    }
}
