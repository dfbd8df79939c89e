//! 主应用程序入口
//!
//! 加载配置、选择存储、启动心跳巡检，并在同一端口上提供 HTTP 与
//! WebSocket 升级服务。

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use application::{Hub, MemoryMessageStore, MessageStore};
use config::AppConfig;
use infrastructure::{create_pg_pool, PgMessageStore, MIGRATOR};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState, JwtService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::load().context("配置无效，拒绝启动")?;
    tracing::info!(config = %config.sanitized(), "配置已加载");

    let store = build_store(&config).await?;
    let hub = Arc::new(Hub::new(store, config.hub.clone()));
    let state = build_state(&config, Arc::clone(&hub))?;

    let shutdown = CancellationToken::new();
    let heartbeat = hub.heartbeat().spawn(shutdown.clone());

    let app = router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("无法监听 {addr}"))?;
    tracing::info!(
        addr = %addr,
        ws_path = %config.server.ws_path,
        "论坛实时消息中心已启动"
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
    .await?;

    shutdown.cancel();
    if let Err(err) = heartbeat.await {
        tracing::warn!(error = %err, "心跳任务异常退出");
    }
    tracing::info!("服务已停止");

    Ok(())
}

/// 配置了数据库时使用 PostgreSQL，否则退回内存存储
async fn build_store(config: &AppConfig) -> anyhow::Result<Arc<dyn MessageStore>> {
    match config.database.url.as_deref() {
        Some(url) => {
            let pool = create_pg_pool(url, config.database.max_connections)
                .await
                .context("连接数据库失败")?;
            MIGRATOR.run(&pool).await.context("数据库迁移失败")?;
            Ok(Arc::new(PgMessageStore::new(pool)))
        }
        None => {
            tracing::warn!("未配置 database.url，使用内存存储（仅限开发，重启后数据丢失）");
            Ok(Arc::new(MemoryMessageStore::default()))
        }
    }
}

/// 组装 HTTP 层状态；缺少签名密钥时失败
fn build_state(config: &AppConfig, hub: Arc<Hub>) -> anyhow::Result<AppState> {
    let jwt_service = Arc::new(JwtService::new(config.jwt_secret()?));
    Ok(AppState::new(
        hub,
        jwt_service,
        config.auth.cookie_name.as_str(),
        config.server.ws_path.as_str(),
    ))
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "无法监听 Ctrl-C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "无法监听 SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("收到停止信号，开始优雅关闭");
    shutdown.cancel();
}
