//! 已读回执扇出
//!
//! 一个 `message_read` 信号按发送者拆成多次独立投递，每个发送者每次最多收到一条回执。

use std::sync::Arc;

use domain::{
    MessageId, MessageRead, MessageReadReceipt, MessageReadSignal, NotificationStore, Timestamp,
    UserId,
};

use crate::dispatcher::{DispatchOutcome, NotificationDispatcher};
use crate::error::ApplicationError;

/// 一次扇出的结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FanoutReport {
    /// 尝试投递的发送者及结果，顺序与存储返回的一致
    pub dispatched: Vec<(UserId, DispatchOutcome)>,
    /// 指定的消息里没有该发送者的消息，未发送
    pub skipped: Vec<UserId>,
    /// 处理时出错的发送者
    pub failed: Vec<UserId>,
}

impl FanoutReport {
    pub fn attempted(&self) -> impl Iterator<Item = UserId> + '_ {
        self.dispatched.iter().map(|(user_id, _)| *user_id)
    }

    pub fn delivered_count(&self) -> usize {
        self.dispatched
            .iter()
            .filter(|(_, outcome)| outcome.is_delivered())
            .count()
    }
}

pub struct ReadReceiptFanout {
    store: Arc<dyn NotificationStore>,
    dispatcher: Arc<NotificationDispatcher>,
}

impl ReadReceiptFanout {
    pub fn new(store: Arc<dyn NotificationStore>, dispatcher: Arc<NotificationDispatcher>) -> Self {
        Self { store, dispatcher }
    }

    /// 处理一次已读信号。
    ///
    /// 校验失败、存储不可用、取时间或查发送者失败时返回错误，由调用方回给读者；
    /// 单个发送者上的失败只记在报告里。
    pub async fn handle(&self, signal: MessageReadSignal) -> Result<FanoutReport, ApplicationError> {
        let read = signal.validate()?;

        if !self.store.is_available() {
            tracing::warn!(
                conversation_id = %read.conversation_id,
                reader_id = %read.reader_id,
                "存储不可用，无法处理已读信号"
            );
            return Err(ApplicationError::StoreUnavailable);
        }

        let read_at = self.store.current_time().await?;
        let senders = self
            .store
            .fetch_message_senders(read.conversation_id, read.reader_id)
            .await?;

        tracing::info!(
            conversation_id = %read.conversation_id,
            reader_id = %read.reader_id,
            senders = senders.len(),
            "发送已读回执"
        );

        let mut report = FanoutReport::default();
        for sender in senders {
            if sender == read.reader_id {
                continue;
            }

            match self.receipt_for(&read, sender, read_at).await {
                Ok(Some(receipt)) => {
                    let outcome = self.dispatcher.notify_event(sender, &receipt).await;
                    report.dispatched.push((sender, outcome));
                }
                Ok(None) => report.skipped.push(sender),
                Err(err) => {
                    tracing::error!(
                        conversation_id = %read.conversation_id,
                        sender_id = %sender,
                        error = %err,
                        "向发送者推送已读回执失败"
                    );
                    report.failed.push(sender);
                }
            }
        }

        Ok(report)
    }

    /// 组装发给某个发送者的回执；给了消息列表但其中没有他的消息时返回 `None`
    async fn receipt_for(
        &self,
        read: &MessageRead,
        sender: UserId,
        read_at: Timestamp,
    ) -> Result<Option<MessageReadReceipt>, ApplicationError> {
        let message_ids = match &read.message_ids {
            None => None,
            Some(candidates) => {
                let owned = self.narrow(read, sender, candidates).await?;
                if owned.is_empty() {
                    return Ok(None);
                }
                Some(owned)
            }
        };

        Ok(Some(MessageReadReceipt {
            conversation_id: read.conversation_id,
            reader_id: read.reader_id,
            message_ids,
            read_at,
        }))
    }

    async fn narrow(
        &self,
        read: &MessageRead,
        sender: UserId,
        candidates: &[MessageId],
    ) -> Result<Vec<MessageId>, ApplicationError> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self
            .store
            .fetch_sender_message_ids(read.conversation_id, sender, candidates)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::dedup::DedupCache;
    use crate::local_transport::{ConnectionReceiver, LocalTransport, TransportFrame};
    use crate::registry::ConnectionRegistry;
    use crate::transport::testing::FailingConnection;
    use chrono::{TimeZone, Utc};
    use domain::{ConversationId, MockNotificationStore, RepositoryError};
    use serde_json::json;
    use std::time::Duration;

    fn user(id: i64) -> UserId {
        UserId::new(id).unwrap()
    }

    fn store_time() -> Timestamp {
        Utc.with_ymd_and_hms(2024, 5, 1, 15, 0, 0).unwrap()
    }

    struct Fixture {
        registry: Arc<ConnectionRegistry>,
        dispatcher: Arc<NotificationDispatcher>,
        transport: LocalTransport,
        clock: Arc<ManualClock>,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(ConnectionRegistry::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap(),
        ));
        let dispatcher = Arc::new(NotificationDispatcher::new(
            registry.clone(),
            Arc::new(DedupCache::new(Duration::from_secs(300))),
            clock.clone(),
            50,
        ));
        Fixture {
            registry,
            dispatcher,
            transport: LocalTransport::default(),
            clock,
        }
    }

    impl Fixture {
        async fn connect(&self, id: i64) -> ConnectionReceiver {
            let (conn, rx) = self.transport.open();
            self.registry.register(user(id), conn, self.clock.now()).await;
            rx
        }
    }

    fn store_with_senders(senders: Vec<i64>) -> MockNotificationStore {
        let mut store = MockNotificationStore::new();
        store.expect_is_available().return_const(true);
        store
            .expect_current_time()
            .returning(|| Ok(store_time()));
        store
            .expect_fetch_message_senders()
            .returning(move |_, _| Ok(senders.iter().map(|id| user(*id)).collect()));
        store
    }

    fn read_signal(message_ids: Option<Vec<i64>>) -> MessageReadSignal {
        MessageReadSignal {
            conversation_id: Some(ConversationId(10)),
            reader_id: Some(user(5)),
            message_ids: message_ids.map(|ids| ids.into_iter().map(MessageId).collect()),
        }
    }

    #[tokio::test]
    async fn each_sender_receives_one_receipt_with_store_time() {
        let fx = fixture();
        let mut reader_rx = fx.connect(5).await;
        let mut rx7 = fx.connect(7).await;
        let mut rx8 = fx.connect(8).await;

        let fanout = ReadReceiptFanout::new(
            Arc::new(store_with_senders(vec![7, 8])),
            fx.dispatcher.clone(),
        );
        let report = fanout.handle(read_signal(None)).await.unwrap();

        assert_eq!(report.attempted().collect::<Vec<_>>(), vec![user(7), user(8)]);
        assert_eq!(report.delivered_count(), 2);

        let expected = json!({
            "conversation_id": 10,
            "reader_id": 5,
            "read_at": "2024-05-01T15:00:00Z"
        });
        for rx in [&mut rx7, &mut rx8] {
            let Some(TransportFrame::Event(event)) = rx.recv().await else {
                panic!("expected a receipt");
            };
            assert_eq!(event.name, "message_read_receipt");
            assert_eq!(event.data, expected);
        }

        assert!(reader_rx.try_recv().is_none());
    }

    #[tokio::test]
    async fn reader_is_never_a_recipient() {
        let fx = fixture();
        let _reader_rx = fx.connect(5).await;

        // 即使存储把读者自己也返回了，也不给他发
        let fanout = ReadReceiptFanout::new(
            Arc::new(store_with_senders(vec![5, 7])),
            fx.dispatcher.clone(),
        );
        let report = fanout.handle(read_signal(None)).await.unwrap();

        assert_eq!(report.attempted().collect::<Vec<_>>(), vec![user(7)]);
    }

    #[tokio::test]
    async fn offline_sender_does_not_block_the_rest() {
        let fx = fixture();
        let mut rx8 = fx.connect(8).await;

        let fanout = ReadReceiptFanout::new(
            Arc::new(store_with_senders(vec![7, 8])),
            fx.dispatcher.clone(),
        );
        let report = fanout.handle(read_signal(None)).await.unwrap();

        assert_eq!(
            report.dispatched,
            vec![
                (user(7), DispatchOutcome::Offline),
                (user(8), DispatchOutcome::Delivered)
            ]
        );
        assert!(matches!(rx8.recv().await, Some(TransportFrame::Event(_))));
    }

    #[tokio::test]
    async fn transport_error_for_one_sender_does_not_block_the_rest() {
        let fx = fixture();
        fx.registry
            .register(user(7), FailingConnection::live(), fx.clock.now())
            .await;
        let mut rx8 = fx.connect(8).await;

        let fanout = ReadReceiptFanout::new(
            Arc::new(store_with_senders(vec![7, 8])),
            fx.dispatcher.clone(),
        );
        let report = fanout.handle(read_signal(None)).await.unwrap();

        assert_eq!(
            report.dispatched,
            vec![
                (user(7), DispatchOutcome::TransportFailed),
                (user(8), DispatchOutcome::Delivered)
            ]
        );
        assert!(report.failed.is_empty());
        assert!(matches!(rx8.recv().await, Some(TransportFrame::Event(_))));
    }

    #[tokio::test]
    async fn narrowing_error_for_one_sender_is_isolated() {
        let fx = fixture();
        let mut rx8 = fx.connect(8).await;

        let mut store = store_with_senders(vec![7, 8]);
        store
            .expect_fetch_sender_message_ids()
            .returning(|_, sender, candidates| {
                if sender.value() == 7 {
                    Err(RepositoryError::storage("timeout"))
                } else {
                    Ok(candidates.iter().copied().filter(|id| id.0 > 100).collect())
                }
            });

        let fanout = ReadReceiptFanout::new(Arc::new(store), fx.dispatcher.clone());
        let report = fanout
            .handle(read_signal(Some(vec![1, 101, 102])))
            .await
            .unwrap();

        assert_eq!(report.failed, vec![user(7)]);
        assert_eq!(report.dispatched, vec![(user(8), DispatchOutcome::Delivered)]);

        let Some(TransportFrame::Event(event)) = rx8.recv().await else {
            panic!("expected a receipt");
        };
        assert_eq!(event.data["message_ids"], json!([101, 102]));
    }

    #[tokio::test]
    async fn sender_without_listed_messages_is_skipped() {
        let fx = fixture();
        let _rx7 = fx.connect(7).await;

        let mut store = store_with_senders(vec![7]);
        store
            .expect_fetch_sender_message_ids()
            .returning(|_, _, _| Ok(Vec::new()));

        let fanout = ReadReceiptFanout::new(Arc::new(store), fx.dispatcher.clone());
        let report = fanout.handle(read_signal(Some(vec![1]))).await.unwrap();

        assert!(report.dispatched.is_empty());
        assert_eq!(report.skipped, vec![user(7)]);
    }

    #[tokio::test]
    async fn empty_message_list_skips_without_querying() {
        let fx = fixture();
        let mut store = store_with_senders(vec![7]);
        store.expect_fetch_sender_message_ids().never();

        let fanout = ReadReceiptFanout::new(Arc::new(store), fx.dispatcher.clone());
        let report = fanout.handle(read_signal(Some(Vec::new()))).await.unwrap();

        assert_eq!(report.skipped, vec![user(7)]);
    }

    #[tokio::test]
    async fn missing_reader_is_rejected_before_touching_storage() {
        let fx = fixture();
        let mut store = MockNotificationStore::new();
        store.expect_is_available().never();
        store.expect_fetch_message_senders().never();

        let fanout = ReadReceiptFanout::new(Arc::new(store), fx.dispatcher.clone());
        let err = fanout
            .handle(MessageReadSignal {
                conversation_id: Some(ConversationId(10)),
                ..Default::default()
            })
            .await
            .unwrap_err();

        assert_eq!(err.client_message(), "invalid payload");
    }

    #[tokio::test]
    async fn unavailable_store_is_reported_to_the_reader() {
        let fx = fixture();
        let mut store = MockNotificationStore::new();
        store.expect_is_available().return_const(false);
        store.expect_current_time().never();

        let fanout = ReadReceiptFanout::new(Arc::new(store), fx.dispatcher.clone());
        let err = fanout.handle(read_signal(None)).await.unwrap_err();

        assert!(matches!(err, ApplicationError::StoreUnavailable));
        assert_eq!(err.client_message(), "service temporarily unavailable");
    }

    #[tokio::test]
    async fn sender_query_failure_aborts_the_fanout() {
        let fx = fixture();
        let mut store = MockNotificationStore::new();
        store.expect_is_available().return_const(true);
        store.expect_current_time().returning(|| Ok(store_time()));
        store
            .expect_fetch_message_senders()
            .returning(|_, _| Err(RepositoryError::storage("connection reset")));

        let fanout = ReadReceiptFanout::new(Arc::new(store), fx.dispatcher.clone());
        let err = fanout.handle(read_signal(None)).await.unwrap_err();

        assert_eq!(err.client_message(), "failed to process read receipt");
    }
}
