use std::{
    collections::{BTreeSet, HashMap},
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use application::{LocalTransport, RealtimeHub, RealtimeHubDependencies, SystemClock};
use async_trait::async_trait;
use config::RealtimeConfig;
use domain::{
    ConversationId, MessageId, NotificationStore, RepositoryResult, Timestamp, UnreadSnapshot,
    UserId,
};
use futures_util::StreamExt;
use serde_json::Value;
use tokio::{net::TcpListener, net::TcpStream, sync::oneshot, time::timeout};
use tokio_tungstenite::{
    connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use web_api::{router, AppState};

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// 内存中的通知存储
pub struct InMemoryStore {
    pub available: AtomicBool,
    pub now: Timestamp,
    /// (会话, 发送者, 消息)
    pub messages: Vec<(ConversationId, UserId, MessageId)>,
    pub unread: HashMap<UserId, UnreadSnapshot>,
}

impl InMemoryStore {
    pub fn new(now: Timestamp) -> Self {
        Self {
            available: AtomicBool::new(true),
            now,
            messages: Vec::new(),
            unread: HashMap::new(),
        }
    }

    pub fn with_message(mut self, conversation: i64, sender: i64, message: i64) -> Self {
        self.messages.push((
            ConversationId(conversation),
            UserId::new(sender).unwrap(),
            MessageId(message),
        ));
        self
    }
}

#[async_trait]
impl NotificationStore for InMemoryStore {
    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn current_time(&self) -> RepositoryResult<Timestamp> {
        Ok(self.now)
    }

    async fn fetch_message_senders(
        &self,
        conversation_id: ConversationId,
        exclude_user_id: UserId,
    ) -> RepositoryResult<Vec<UserId>> {
        let senders: BTreeSet<UserId> = self
            .messages
            .iter()
            .filter(|(conversation, sender, _)| {
                *conversation == conversation_id && *sender != exclude_user_id
            })
            .map(|(_, sender, _)| *sender)
            .collect();
        Ok(senders.into_iter().collect())
    }

    async fn fetch_sender_message_ids(
        &self,
        conversation_id: ConversationId,
        sender_id: UserId,
        candidates: &[MessageId],
    ) -> RepositoryResult<Vec<MessageId>> {
        Ok(self
            .messages
            .iter()
            .filter(|(conversation, sender, message)| {
                *conversation == conversation_id
                    && *sender == sender_id
                    && candidates.contains(message)
            })
            .map(|(_, _, message)| *message)
            .collect())
    }

    async fn fetch_unread_summary(&self, user_id: UserId) -> RepositoryResult<UnreadSnapshot> {
        Ok(self.unread.get(&user_id).cloned().unwrap_or_default())
    }
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub hub: Arc<RealtimeHub>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestServer {
    pub fn socket_url(&self, user_id: &str) -> String {
        format!("ws://{}/socket?userId={}", self.addr, user_id)
    }

    pub async fn connect(&self, user_id: i64) -> WsClient {
        let (mut ws, _) = connect_async(self.socket_url(&user_id.to_string()))
            .await
            .expect("connect websocket");
        let ack = next_event(&mut ws).await;
        assert_eq!(ack["event"], "connection_success");
        ws
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

pub async fn spawn_server(store: InMemoryStore) -> TestServer {
    let mut config = RealtimeConfig::default();
    config.dispatch.force_logout_grace_ms = 50;

    let hub = Arc::new(RealtimeHub::new(RealtimeHubDependencies {
        store: Arc::new(store),
        clock: Arc::new(SystemClock),
        config: config.dispatch.clone(),
    }));
    let state = AppState::new(
        hub.clone(),
        LocalTransport::new(config.dispatch.broadcast_capacity),
        config.server.cors_origins.clone(),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let app = router(state);

    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
            .ok();
    });

    TestServer {
        addr,
        hub,
        shutdown: Some(shutdown_tx),
    }
}

/// 读取下一个事件帧，跳过控制帧
pub async fn next_event(ws: &mut WsClient) -> Value {
    loop {
        let message = timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for event")
            .expect("stream ended")
            .expect("websocket error");
        match &message {
            Message::Text(_) => {
                return serde_json::from_str(message.to_text().expect("text frame"))
                    .expect("json event");
            }
            Message::Close(_) => panic!("connection closed while waiting for event"),
            _ => continue,
        }
    }
}

/// 在给定时间内没有收到任何事件帧
pub async fn assert_silent(ws: &mut WsClient, window: Duration) {
    if let Ok(Some(Ok(Message::Text(text)))) = timeout(window, ws.next()).await {
        panic!("unexpected event: {}", text.as_str());
    }
}

/// 等待服务端关闭连接
pub async fn wait_closed(ws: &mut WsClient) {
    loop {
        match timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for close")
        {
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
            Some(Ok(_)) => continue,
        }
    }
}
