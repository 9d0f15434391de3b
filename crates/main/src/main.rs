//! 主应用程序入口
//!
//! 启动实时通知服务：WebSocket 握手与信号处理、在线巡检、健康检查。

use std::future::IntoFuture;
use std::sync::Arc;

use application::{LocalTransport, RealtimeHub, RealtimeHubDependencies, SystemClock};
use config::RealtimeConfig;
use infrastructure::{create_pg_pool, PgNotificationStore};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = RealtimeConfig::load()?;
    info!(config = %config.sanitize(), "配置加载完成");

    let pool = create_pg_pool(&config.database.url, config.database.max_connections).await?;
    let store = Arc::new(PgNotificationStore::new(pool.clone()));

    let hub = Arc::new(RealtimeHub::new(RealtimeHubDependencies {
        store,
        clock: Arc::new(SystemClock),
        config: config.dispatch.clone(),
    }));

    let shutdown = CancellationToken::new();
    let janitor = hub.spawn_janitor(shutdown.child_token());

    let state = AppState::new(
        hub.clone(),
        LocalTransport::new(config.dispatch.broadcast_capacity),
        config.server.cors_origins.clone(),
    );
    let app = router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("实时通知服务启动在 http://{}", addr);

    let server = axum::serve(listener, app)
        .with_graceful_shutdown({
            let hub = hub.clone();
            let shutdown = shutdown.clone();
            async move {
                shutdown_signal().await;
                hub.stop(&shutdown, janitor).await;
            }
        })
        .into_future();

    let timeout = config.shutdown.timeout();
    let forced_exit = async {
        shutdown.cancelled().await;
        tokio::time::sleep(timeout).await;
    };

    tokio::select! {
        result = server => result?,
        _ = forced_exit => {
            warn!(timeout_secs = timeout.as_secs(), "优雅停机超时，强制退出");
        }
    }

    pool.close().await;
    info!("实时通知服务已停止");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "无法监听 Ctrl+C 信号");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig_term) => {
                sig_term.recv().await;
            }
            Err(err) => {
                error!(error = %err, "无法监听终止信号");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("接收到 Ctrl+C 信号，开始优雅停机...");
        }
        _ = terminate => {
            info!("接收到终止信号，开始优雅停机...");
        }
    }
}
