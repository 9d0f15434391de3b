//! 实时通知分发核心。
//!
//! 维护 用户 -> 连接 的在线映射，把业务事件、已读回执、未读数和强制下线
//! 推送到正确的连接上，并抑制重复投递。传输层通过 [`ConnectionHandle`] 接入，
//! 存储通过领域层的 `NotificationStore` 接入。

pub mod clock;
pub mod dedup;
pub mod dispatcher;
pub mod error;
pub mod force_logout;
pub mod hub;
pub mod janitor;
pub mod local_transport;
pub mod read_receipt;
pub mod registry;
pub mod transport;
pub mod unread;

pub use clock::{Clock, ManualClock, SystemClock};
pub use dedup::{DedupCache, Fingerprint};
pub use dispatcher::{DispatchOutcome, NotificationDispatcher};
pub use error::ApplicationError;
pub use force_logout::{ForceLogoutCoordinator, ForceLogoutOutcome};
pub use hub::{RealtimeHub, RealtimeHubDependencies};
pub use janitor::{JanitorReport, PresenceJanitor};
pub use local_transport::{ChannelConnection, ConnectionReceiver, LocalTransport, TransportFrame};
pub use read_receipt::{FanoutReport, ReadReceiptFanout};
pub use registry::{Connection, ConnectionRegistry, PresenceEntry};
pub use transport::{ConnectionHandle, TransportError};
pub use unread::UnreadAggregator;
