//! 主应用程序入口
//!
//! 加载配置、选择存储后端，启动 Axum Web API 与 WebSocket 服务。

use std::sync::Arc;

use anyhow::Context;
use application::{ChatService, ChatServiceDependencies, ConnectionRegistry, RoomRelay, SystemClock};
use config::{AppConfig, StorageBackend};
use infrastructure::Storage;
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志，未设置 RUST_LOG 时默认 info
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::load().context("loading configuration")?;
    tracing::info!(config = %config.sanitize(), "configuration loaded");

    let storage = match config.storage.backend {
        StorageBackend::Memory => Storage::in_memory(),
        StorageBackend::Postgres => {
            let database_url = config
                .storage
                .database_url
                .as_deref()
                .context("storage.database_url is required for the postgres backend")?;
            Storage::connect_postgres(database_url, config.storage.max_connections)
                .await
                .context("connecting to postgres")?
        }
    };

    let chat_service = ChatService::new(ChatServiceDependencies {
        room_repository: storage.room_repository.clone(),
        user_repository: storage.user_repository.clone(),
        message_repository: storage.message_repository.clone(),
    });

    // 注册表在进程内，重启即丢失
    let registry = Arc::new(ConnectionRegistry::new());
    let relay = RoomRelay::new(registry, storage.user_repository.clone(), Arc::new(SystemClock))
        .with_disconnect_announcements(config.realtime.announce_disconnects);

    let state = AppState::new(Arc::new(chat_service), Arc::new(relay));
    let app = router(state, &config.server.cors_origins);

    let address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("binding to {address}"))?;

    tracing::info!(%address, "chatroom server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
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

    tracing::info!("shutdown signal received, draining connections");
}
