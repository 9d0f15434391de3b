//! 传输层连接句柄
//!
//! 分发核心只通过这个接口接触连接：检查是否存活、发送事件、组内广播和断开。

use domain::{ConnectionId, OutboundEvent};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransportError {
    #[error("connection closed")]
    Closed,
    #[error("broadcast failed: {0}")]
    Broadcast(String),
    #[error("serialization failed: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        TransportError::Serialization(err.to_string())
    }
}

pub trait ConnectionHandle: Send + Sync {
    /// 连接标识，同一用户重连后会变化
    fn id(&self) -> ConnectionId;

    fn is_live(&self) -> bool;

    /// 向这条连接发送事件
    fn emit(&self, event: OutboundEvent) -> Result<(), TransportError>;

    /// 向同一广播组内除自己之外的所有连接发送事件，返回接收方数量
    fn broadcast_others(&self, event: OutboundEvent) -> Result<usize, TransportError>;

    /// 发送完已排队的事件后关闭连接，重复调用无副作用
    fn disconnect(&self) -> Result<(), TransportError>;
}
