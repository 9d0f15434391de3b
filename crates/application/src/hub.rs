//! 实时通知中枢
//!
//! 把注册表、去重、分发、扇出、未读推送、强制下线和巡检组装在一起，
//! 传输层和业务调用方都只持有这一个对象。

use std::sync::Arc;

use config::DispatchConfig;
use domain::{
    ConnectionSuccess, ErrorEvent, InboundSignal, NotificationStore, Pong, ServerEvent, UserId,
};
use serde_json::Value as JsonValue;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::dedup::DedupCache;
use crate::dispatcher::{DispatchOutcome, NotificationDispatcher};
use crate::error::ApplicationError;
use crate::force_logout::{ForceLogoutCoordinator, ForceLogoutOutcome};
use crate::janitor::{JanitorReport, PresenceJanitor};
use crate::read_receipt::ReadReceiptFanout;
use crate::registry::{Connection, ConnectionRegistry, PresenceEntry};
use crate::transport::ConnectionHandle;
use crate::unread::UnreadAggregator;

/// 中枢依赖
pub struct RealtimeHubDependencies {
    pub store: Arc<dyn NotificationStore>,
    pub clock: Arc<dyn Clock>,
    pub config: DispatchConfig,
}

pub struct RealtimeHub {
    store: Arc<dyn NotificationStore>,
    clock: Arc<dyn Clock>,
    registry: Arc<ConnectionRegistry>,
    dispatcher: Arc<NotificationDispatcher>,
    fanout: ReadReceiptFanout,
    unread: UnreadAggregator,
    force_logout: ForceLogoutCoordinator,
    janitor: Arc<PresenceJanitor>,
}

impl RealtimeHub {
    pub fn new(deps: RealtimeHubDependencies) -> Self {
        let RealtimeHubDependencies {
            store,
            clock,
            config,
        } = deps;

        let registry = Arc::new(ConnectionRegistry::new());
        let dedup = Arc::new(DedupCache::new(config.dedup_retention()));
        let dispatcher = Arc::new(NotificationDispatcher::new(
            registry.clone(),
            dedup.clone(),
            clock.clone(),
            config.payload_digest_len,
        ));

        Self {
            fanout: ReadReceiptFanout::new(store.clone(), dispatcher.clone()),
            unread: UnreadAggregator::new(store.clone(), dispatcher.clone(), clock.clone()),
            force_logout: ForceLogoutCoordinator::new(
                registry.clone(),
                clock.clone(),
                config.force_logout_grace(),
            ),
            janitor: Arc::new(PresenceJanitor::new(
                store.clone(),
                registry.clone(),
                dedup,
                clock.clone(),
                config.janitor_interval(),
            )),
            store,
            clock,
            registry,
            dispatcher,
        }
    }

    pub fn store(&self) -> &Arc<dyn NotificationStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// 握手成功后登记连接并回 `connection_success`
    pub async fn open_connection(
        &self,
        user_id: UserId,
        handle: Arc<dyn ConnectionHandle>,
    ) -> Result<Connection, ApplicationError> {
        let connected_at = self.clock.now();
        let connection = Connection {
            user_id,
            handle: handle.clone(),
            connected_at,
        };

        if let Some(previous) = self
            .registry
            .register(user_id, handle.clone(), connected_at)
            .await
        {
            tracing::info!(
                user_id = %user_id,
                previous = %previous.id(),
                "用户重复连接，旧连接将由巡检回收"
            );
        }

        let ack = ConnectionSuccess {
            user_id,
            connected_at,
            server_time: connected_at,
        };
        if let Err(err) = ack.to_event().map_err(ApplicationError::from).and_then(|event| {
            handle.emit(event).map_err(ApplicationError::from)
        }) {
            self.registry
                .unregister_connection(user_id, connection.id())
                .await;
            return Err(err);
        }

        tracing::info!(user_id = %user_id, connection_id = %connection.id(), "用户已连接");
        Ok(connection)
    }

    /// 连接断开时调用；旧连接断开不会影响同一用户的新连接
    pub async fn close_connection(&self, connection: &Connection, reason: &str) -> bool {
        let removed = self
            .registry
            .unregister_connection(connection.user_id, connection.id())
            .await;
        tracing::info!(
            user_id = %connection.user_id,
            connection_id = %connection.id(),
            reason,
            removed,
            "用户已断开连接"
        );
        removed
    }

    /// 处理连接上收到的一个文本帧
    pub async fn handle_text_frame(&self, connection: &Connection, text: &str) {
        let signal = match InboundSignal::parse(text) {
            Ok(signal) => signal,
            Err(err) => {
                tracing::warn!(user_id = %connection.user_id, error = %err, "无法解析的入站帧");
                self.reply(connection, &ErrorEvent::new("invalid payload"));
                return;
            }
        };

        match signal {
            InboundSignal::Ping => {
                let now = self.clock.now();
                self.reply(
                    connection,
                    &Pong {
                        timestamp: now,
                        server_time: now,
                        user_id: connection.user_id,
                    },
                );
            }
            InboundSignal::MessageRead(read) => match self.fanout.handle(read).await {
                Ok(report) => {
                    tracing::debug!(
                        user_id = %connection.user_id,
                        delivered = report.delivered_count(),
                        skipped = report.skipped.len(),
                        failed = report.failed.len(),
                        "已读回执处理完成"
                    );
                }
                Err(err) => {
                    tracing::warn!(user_id = %connection.user_id, error = %err, "已读信号处理失败");
                    self.reply(connection, &ErrorEvent::new(err.client_message()));
                }
            },
        }
    }

    fn reply<E: ServerEvent>(&self, connection: &Connection, event: &E) {
        let result = event
            .to_event()
            .map_err(ApplicationError::from)
            .and_then(|event| connection.handle.emit(event).map_err(ApplicationError::from));
        if let Err(err) = result {
            tracing::warn!(user_id = %connection.user_id, event = E::NAME, error = %err, "回复事件发送失败");
        }
    }

    pub async fn notify(&self, user_id: UserId, event: &str, payload: JsonValue) -> DispatchOutcome {
        self.dispatcher.notify(user_id, event, payload).await
    }

    pub async fn emit_direct(&self, user_id: UserId, event: &str, payload: JsonValue) -> DispatchOutcome {
        self.dispatcher.emit_direct(user_id, event, payload).await
    }

    pub async fn push_unread_update(&self, user_id: UserId) -> DispatchOutcome {
        self.unread.push_unread_update(user_id).await
    }

    pub async fn force_logout(&self, user_id: UserId, reason: Option<&str>) -> ForceLogoutOutcome {
        self.force_logout.force_logout(user_id, reason).await
    }

    pub async fn presence(&self) -> Vec<PresenceEntry> {
        self.registry.snapshot().await
    }

    pub async fn run_janitor_once(&self) -> JanitorReport {
        self.janitor.run_once().await
    }

    pub fn spawn_janitor(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        self.janitor.clone().spawn(shutdown)
    }

    /// 先停止巡检任务并等它退出，再关闭所有连接
    pub async fn stop(&self, shutdown: &CancellationToken, janitor: JoinHandle<()>) -> usize {
        shutdown.cancel();
        if let Err(err) = janitor.await {
            tracing::error!(error = %err, "在线巡检任务异常退出");
        }
        self.shutdown().await
    }

    /// 停机：清空注册表并关闭所有连接，返回关闭的数量
    pub async fn shutdown(&self) -> usize {
        let connections = self.registry.drain().await;
        for connection in &connections {
            if let Err(err) = connection.handle.disconnect() {
                tracing::warn!(user_id = %connection.user_id, error = %err, "停机时关闭连接失败");
            }
        }
        tracing::info!(closed = connections.len(), "已关闭所有实时连接");
        connections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::local_transport::{ConnectionReceiver, LocalTransport, TransportFrame};
    use chrono::{TimeZone, Utc};
    use config::RealtimeConfig;
    use domain::{ConversationId, MockNotificationStore, OutboundEvent};
    use serde_json::json;

    fn user(id: i64) -> UserId {
        UserId::new(id).unwrap()
    }

    fn hub(store: MockNotificationStore) -> RealtimeHub {
        RealtimeHub::new(RealtimeHubDependencies {
            store: Arc::new(store),
            clock: Arc::new(ManualClock::new(
                Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap(),
            )),
            config: RealtimeConfig::default().dispatch,
        })
    }

    async fn connect(
        hub: &RealtimeHub,
        transport: &LocalTransport,
        id: i64,
    ) -> (Connection, ConnectionReceiver) {
        let (handle, mut rx) = transport.open();
        let connection = hub.open_connection(user(id), handle).await.unwrap();
        // 丢掉 connection_success
        rx.recv().await;
        (connection, rx)
    }

    fn event(frame: Option<TransportFrame>) -> OutboundEvent {
        match frame {
            Some(TransportFrame::Event(event)) => event,
            other => panic!("expected an event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn handshake_registers_and_acknowledges() {
        let hub = hub(MockNotificationStore::new());
        let transport = LocalTransport::default();
        let (handle, mut rx) = transport.open();

        let connection = hub.open_connection(user(5), handle).await.unwrap();

        let ack = event(rx.recv().await);
        assert_eq!(ack.name, "connection_success");
        assert_eq!(ack.data["user_id"], 5);
        assert_eq!(ack.data["connected_at"], "2024-05-01T08:00:00Z");
        assert_eq!(
            hub.registry().lookup(user(5)).await.unwrap().id(),
            connection.id()
        );
    }

    #[tokio::test]
    async fn ping_gets_pong() {
        let hub = hub(MockNotificationStore::new());
        let transport = LocalTransport::default();
        let (connection, mut rx) = connect(&hub, &transport, 5).await;

        hub.handle_text_frame(&connection, r#"{"event":"ping","data":{}}"#)
            .await;

        let pong = event(rx.recv().await);
        assert_eq!(pong.name, "pong");
        assert_eq!(pong.data["user_id"], 5);
        assert_eq!(pong.data["server_time"], "2024-05-01T08:00:00Z");
    }

    #[tokio::test]
    async fn garbage_frame_gets_error_event() {
        let hub = hub(MockNotificationStore::new());
        let transport = LocalTransport::default();
        let (connection, mut rx) = connect(&hub, &transport, 5).await;

        hub.handle_text_frame(&connection, "not json").await;
        hub.handle_text_frame(&connection, r#"{"event":"typing","data":{}}"#)
            .await;

        for _ in 0..2 {
            let error = event(rx.recv().await);
            assert_eq!(error.name, "error");
            assert_eq!(error.data, json!({"message": "invalid payload"}));
        }
    }

    #[tokio::test]
    async fn message_read_routes_receipts_to_senders() {
        let mut store = MockNotificationStore::new();
        store.expect_is_available().return_const(true);
        store
            .expect_current_time()
            .returning(|| Ok(Utc.with_ymd_and_hms(2024, 5, 1, 15, 0, 0).unwrap()));
        store
            .expect_fetch_message_senders()
            .withf(|conversation, reader| *conversation == ConversationId(10) && reader.value() == 5)
            .returning(|_, _| Ok(vec![user(7), user(8)]));

        let hub = hub(store);
        let transport = LocalTransport::default();
        let (reader, mut reader_rx) = connect(&hub, &transport, 5).await;
        let (_c7, mut rx7) = connect(&hub, &transport, 7).await;
        let (_c8, mut rx8) = connect(&hub, &transport, 8).await;

        hub.handle_text_frame(
            &reader,
            r#"{"event":"message_read","data":{"conversation_id":10,"reader_id":5}}"#,
        )
        .await;

        for rx in [&mut rx7, &mut rx8] {
            let receipt = event(rx.recv().await);
            assert_eq!(receipt.name, "message_read_receipt");
            assert_eq!(receipt.data["read_at"], "2024-05-01T15:00:00Z");
        }
        assert!(reader_rx.try_recv().is_none());
    }

    #[tokio::test]
    async fn invalid_read_signal_gets_error_event() {
        let hub = hub(MockNotificationStore::new());
        let transport = LocalTransport::default();
        let (connection, mut rx) = connect(&hub, &transport, 5).await;

        hub.handle_text_frame(
            &connection,
            r#"{"event":"message_read","data":{"conversation_id":10}}"#,
        )
        .await;

        let error = event(rx.recv().await);
        assert_eq!(error.data["message"], "invalid payload");
    }

    #[tokio::test]
    async fn closing_a_replaced_connection_keeps_the_new_one() {
        let hub = hub(MockNotificationStore::new());
        let transport = LocalTransport::default();
        let (first, _rx1) = connect(&hub, &transport, 5).await;
        let (second, _rx2) = connect(&hub, &transport, 5).await;

        assert!(!hub.close_connection(&first, "transport close").await);
        assert_eq!(
            hub.registry().lookup(user(5)).await.unwrap().id(),
            second.id()
        );
        assert!(hub.close_connection(&second, "client namespace disconnect").await);
        assert!(hub.presence().await.is_empty());
    }

    #[tokio::test]
    async fn shutdown_closes_every_connection() {
        let hub = hub(MockNotificationStore::new());
        let transport = LocalTransport::default();
        let (_a, mut rx_a) = connect(&hub, &transport, 1).await;
        let (_b, mut rx_b) = connect(&hub, &transport, 2).await;

        assert_eq!(hub.shutdown().await, 2);
        assert_eq!(rx_a.recv().await, Some(TransportFrame::Close));
        assert_eq!(rx_b.recv().await, Some(TransportFrame::Close));
        assert!(hub.registry().is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_halts_janitor_before_closing_connections() {
        let hub = hub(MockNotificationStore::new());
        let transport = LocalTransport::default();
        let (_connection, mut rx) = connect(&hub, &transport, 5).await;
        let shutdown = CancellationToken::new();
        let janitor = hub.spawn_janitor(shutdown.child_token());

        let closed = hub.stop(&shutdown, janitor).await;

        assert_eq!(closed, 1);
        assert!(shutdown.is_cancelled());
        assert!(hub.registry().is_empty().await);
        assert!(matches!(rx.recv().await, Some(TransportFrame::Close)));
    }
}
