//! 领域实体定义
//!
//! 包含出站事件载荷、入站信号和未读数快照。

pub mod notification;
pub mod unread;
pub mod websocket;

// 重新导出核心实体
pub use notification::{
    event_names, ConnectionSuccess, ErrorEvent, ForceLogout, GlobalForceLogout,
    MessageReadReceipt, NotificationPriority, OutboundEvent, Pong, ServerEvent,
    UnreadCountUpdate, DEFAULT_FORCE_LOGOUT_REASON,
};
pub use unread::{ConversationSummary, UnreadSnapshot};
pub use websocket::{signal_names, InboundSignal, MessageRead, MessageReadSignal};
