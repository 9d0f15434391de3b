// 进程内传输实现：每条连接一个直发队列，所有连接共享一个广播组
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use domain::{ConnectionId, OutboundEvent};
use tokio::sync::{broadcast, mpsc};

use crate::transport::{ConnectionHandle, TransportError};

/// 连接收到的帧
#[derive(Debug, Clone, PartialEq)]
pub enum TransportFrame {
    Event(OutboundEvent),
    /// 要求写端关闭底层连接
    Close,
}

#[derive(Debug, Clone)]
struct GroupFrame {
    origin: ConnectionId,
    event: OutboundEvent,
}

#[derive(Clone)]
pub struct LocalTransport {
    group: broadcast::Sender<GroupFrame>,
}

impl LocalTransport {
    pub fn new(capacity: usize) -> Self {
        let (group, _) = broadcast::channel(capacity.max(1));
        Self { group }
    }

    /// 打开一条新连接，返回句柄和该连接的帧接收端
    pub fn open(&self) -> (Arc<ChannelConnection>, ConnectionReceiver) {
        let id = ConnectionId::new();
        let (outbound, direct) = mpsc::unbounded_channel();
        let handle = Arc::new(ChannelConnection {
            id,
            outbound,
            group: self.group.clone(),
            closed: AtomicBool::new(false),
        });
        let receiver = ConnectionReceiver {
            id,
            direct,
            group: Some(self.group.subscribe()),
        };
        (handle, receiver)
    }
}

impl Default for LocalTransport {
    fn default() -> Self {
        Self::new(256)
    }
}

pub struct ChannelConnection {
    id: ConnectionId,
    outbound: mpsc::UnboundedSender<TransportFrame>,
    group: broadcast::Sender<GroupFrame>,
    closed: AtomicBool,
}

impl ChannelConnection {
    /// 对端已离开时由写端调用，之后句柄报告为不存活
    pub fn mark_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl ConnectionHandle for ChannelConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn is_live(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && !self.outbound.is_closed()
    }

    fn emit(&self, event: OutboundEvent) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.outbound
            .send(TransportFrame::Event(event))
            .map_err(|_| TransportError::Closed)
    }

    fn broadcast_others(&self, event: OutboundEvent) -> Result<usize, TransportError> {
        let frame = GroupFrame {
            origin: self.id,
            event,
        };
        match self.group.send(frame) {
            // 接收者数量包含自己
            Ok(receivers) => Ok(receivers.saturating_sub(1)),
            Err(err) => Err(TransportError::Broadcast(err.to_string())),
        }
    }

    fn disconnect(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        // 写端已经退出时没有需要关闭的东西
        let _ = self.outbound.send(TransportFrame::Close);
        Ok(())
    }
}

pub struct ConnectionReceiver {
    id: ConnectionId,
    direct: mpsc::UnboundedReceiver<TransportFrame>,
    group: Option<broadcast::Receiver<GroupFrame>>,
}

impl ConnectionReceiver {
    pub fn connection_id(&self) -> ConnectionId {
        self.id
    }

    /// 非阻塞地取一个已到达的帧
    pub fn try_recv(&mut self) -> Option<TransportFrame> {
        if let Ok(frame) = self.direct.try_recv() {
            return Some(frame);
        }
        let group = self.group.as_mut()?;
        loop {
            match group.try_recv() {
                Ok(frame) if frame.origin == self.id => continue,
                Ok(frame) => return Some(TransportFrame::Event(frame.event)),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }

    /// 下一个要写出的帧，直发队列关闭后返回 `None`
    pub async fn recv(&mut self) -> Option<TransportFrame> {
        loop {
            let Some(group) = self.group.as_mut() else {
                return self.direct.recv().await;
            };

            tokio::select! {
                biased;
                frame = self.direct.recv() => return frame,
                received = group.recv() => match received {
                    Ok(frame) => {
                        // 过滤自己发出的广播
                        if frame.origin != self.id {
                            return Some(TransportFrame::Event(frame.event));
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(connection_id = %self.id, skipped, "广播帧积压，已丢弃部分帧");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        self.group = None;
                    }
                },
            }
        }
    }
}
