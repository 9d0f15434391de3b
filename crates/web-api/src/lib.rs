//! Web API 层。
//!
//! 提供 Axum 路由：`/socket` 完成握手并把连接交给实时通知中枢，`/health` 报告服务状态。

mod error;
mod routes;
mod state;
mod ws_connection;

pub use error::ApiError;
pub use routes::router;
pub use state::AppState;
