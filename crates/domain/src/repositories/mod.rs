//! Repository接口定义
//!
//! 内层定义接口，外层实现接口。

pub mod notification_repository;

pub use notification_repository::NotificationStore;

#[cfg(feature = "testing")]
pub use notification_repository::MockNotificationStore;
