//! 基础设施层实现。
//!
//! 提供 Postgres 上的通知存储协作方，实现领域层定义的查询接口。

pub mod repository;

pub use repository::{create_pg_pool, PgNotificationStore};
