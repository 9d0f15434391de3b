//! 强制下线
//!
//! 先给目标连接发 `force_logout`，再向同一广播组的其他连接发 `global_force_logout`，
//! 宽限期过后移除登记并关闭连接。

use std::sync::Arc;
use std::time::Duration;

use domain::{
    ForceLogout, GlobalForceLogout, ServerEvent, UserId, DEFAULT_FORCE_LOGOUT_REASON,
};

use crate::clock::Clock;
use crate::registry::{Connection, ConnectionRegistry};
use crate::transport::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForceLogoutOutcome {
    /// 下线通知已发给目标连接，断开已排期
    Signalled,
    NotConnected,
    /// 目标连接存在但通知没发出去
    SignalFailed,
}

impl ForceLogoutOutcome {
    pub fn is_signalled(self) -> bool {
        matches!(self, ForceLogoutOutcome::Signalled)
    }
}

pub struct ForceLogoutCoordinator {
    registry: Arc<ConnectionRegistry>,
    clock: Arc<dyn Clock>,
    grace: Duration,
}

impl ForceLogoutCoordinator {
    pub fn new(registry: Arc<ConnectionRegistry>, clock: Arc<dyn Clock>, grace: Duration) -> Self {
        Self {
            registry,
            clock,
            grace,
        }
    }

    pub async fn force_logout(&self, user_id: UserId, reason: Option<&str>) -> ForceLogoutOutcome {
        let Some(connection) = self.registry.lookup(user_id).await else {
            tracing::info!(user_id = %user_id, "用户不在线，跳过强制下线");
            return ForceLogoutOutcome::NotConnected;
        };

        let reason = reason
            .map(str::trim)
            .filter(|reason| !reason.is_empty())
            .unwrap_or(DEFAULT_FORCE_LOGOUT_REASON);
        let now = self.clock.now();
        tracing::info!(user_id = %user_id, reason, "发送强制下线通知");

        let signal = ForceLogout::new(user_id, reason, now)
            .to_event()
            .map_err(TransportError::from)
            .and_then(|event| connection.handle.emit(event));
        if let Err(err) = signal {
            tracing::error!(user_id = %user_id, error = %err, "强制下线通知发送失败");
            return ForceLogoutOutcome::SignalFailed;
        }

        let global = GlobalForceLogout {
            target_user_id: user_id,
            reason: reason.to_string(),
            timestamp: now,
        };
        match global
            .to_event()
            .map_err(TransportError::from)
            .and_then(|event| connection.handle.broadcast_others(event))
        {
            Ok(receivers) => {
                tracing::debug!(user_id = %user_id, receivers, "强制下线广播已发送");
            }
            Err(err) => {
                tracing::warn!(user_id = %user_id, error = %err, "强制下线广播失败");
            }
        }

        self.schedule_teardown(connection);
        ForceLogoutOutcome::Signalled
    }

    fn schedule_teardown(&self, connection: Connection) {
        let registry = self.registry.clone();
        let grace = self.grace;

        tokio::spawn(async move {
            tokio::time::sleep(grace).await;

            // 期间重连的新连接不受影响
            let removed = registry
                .unregister_connection(connection.user_id, connection.id())
                .await;
            match connection.handle.disconnect() {
                Ok(()) => tracing::info!(
                    user_id = %connection.user_id,
                    removed,
                    "已断开被强制下线的连接"
                ),
                Err(err) => tracing::error!(
                    user_id = %connection.user_id,
                    error = %err,
                    "断开被强制下线的连接失败"
                ),
            }
        });
    }
}
