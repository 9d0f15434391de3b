//! 在线巡检
//!
//! 定期清理过期的去重记录，移除传输层已报告失效的连接，并刷新存储的可用状态。

use std::sync::Arc;
use std::time::Duration;

use domain::NotificationStore;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::dedup::DedupCache;
use crate::registry::ConnectionRegistry;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JanitorReport {
    pub dedup_evicted: usize,
    pub stale_evicted: usize,
    pub live_connections: usize,
    pub store_available: bool,
}

pub struct PresenceJanitor {
    store: Arc<dyn NotificationStore>,
    registry: Arc<ConnectionRegistry>,
    dedup: Arc<DedupCache>,
    clock: Arc<dyn Clock>,
    interval: Duration,
}

impl PresenceJanitor {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        registry: Arc<ConnectionRegistry>,
        dedup: Arc<DedupCache>,
        clock: Arc<dyn Clock>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            registry,
            dedup,
            clock,
            interval,
        }
    }

    /// 执行一轮巡检
    pub async fn run_once(&self) -> JanitorReport {
        let dedup_evicted = self.dedup.sweep(self.clock.now());

        let mut stale_evicted = 0;
        for entry in self.registry.snapshot().await {
            if entry.live {
                continue;
            }

            let Some(connection) = self.registry.lookup(entry.user_id).await else {
                continue;
            };
            // 快照之后已被新连接替换
            if connection.id() != entry.connection_id {
                continue;
            }
            if !self
                .registry
                .unregister_connection(entry.user_id, entry.connection_id)
                .await
            {
                continue;
            }

            stale_evicted += 1;
            tracing::info!(user_id = %entry.user_id, "移除已失效的连接");
            if let Err(err) = connection.handle.disconnect() {
                tracing::warn!(user_id = %entry.user_id, error = %err, "关闭失效连接出错");
            }
        }

        let report = JanitorReport {
            dedup_evicted,
            stale_evicted,
            live_connections: self.registry.len().await,
            store_available: self.store.refresh_availability().await,
        };
        tracing::info!(
            live_connections = report.live_connections,
            store_available = report.store_available,
            stale_evicted = report.stale_evicted,
            dedup_evicted = report.dedup_evicted,
            "在线巡检完成"
        );
        report
    }

    /// 在后台按固定周期巡检，直到 `shutdown` 被取消
    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // 第一次 tick 立即返回
            ticker.tick().await;

            tracing::info!(interval_secs = self.interval.as_secs(), "在线巡检已启动");
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        self.run_once().await;
                    }
                }
            }
            tracing::info!("在线巡检已停止");
        })
    }
}
