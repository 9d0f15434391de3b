//! 实时通知分发的领域模型
//!
//! 包含用户/会话/消息标识、连接上收发的事件载荷，以及存储协作方接口。

pub mod entities;
pub mod errors;
pub mod repositories;
pub mod value_objects;

// 重新导出常用类型
pub use entities::*;
pub use errors::*;
pub use repositories::*;
pub use value_objects::*;
