use audiobook_upload_rust::{
    config::{AppConfig, LogConfig},
    logging,
    server::{self, AppState},
    session::SessionReaper,
};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// 配置文件路径
const CONFIG_PATH: &str = "config/app.toml";

/// 加载日志配置
///
/// 只读取配置文件中的 [log] 节，失败时返回默认配置。
/// 完整配置在日志系统就绪后再加载，加载日志才能落到文件里。
async fn load_log_config() -> LogConfig {
    if let Ok(content) = tokio::fs::read_to_string(CONFIG_PATH).await {
        if let Ok(value) = toml::from_str::<toml::Value>(&content) {
            if let Some(log_table) = value.get("log") {
                if let Ok(log_config) = log_table.clone().try_into::<LogConfig>() {
                    return log_config;
                }
            }
        }
    }

    LogConfig::default()
}

/// 等待关闭信号（Ctrl+C 或 SIGTERM）
async fn shutdown_signal() {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("收到 Ctrl+C，开始优雅关闭..."),
        _ = terminate => info!("收到 SIGTERM，开始优雅关闭..."),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 先尝试加载日志配置，失败时使用默认配置
    let log_config = load_log_config().await;

    // 初始化日志系统（必须保持 _log_guard 存活）
    let _log_guard = logging::init_logging(&log_config);

    info!(
        "Audiobook Upload Rust v{} 启动中...",
        env!("CARGO_PKG_VERSION")
    );

    // 加载完整配置
    let config = AppConfig::load_or_default(CONFIG_PATH).await;
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let session_config = config.session.clone();

    // 创建应用状态
    let app_state = AppState::new(config).await?;
    info!("应用状态初始化完成");

    // 启动会话回收器
    let shutdown = CancellationToken::new();
    let reaper = SessionReaper::new(
        app_state.sessions.clone(),
        session_config.retention_secs(),
        session_config.sweep_interval(),
    );
    let reaper_handle = reaper.spawn(shutdown.clone());

    // 构建路由
    let app = server::build_router(app_state);

    info!("服务器启动在: http://{}", addr);
    info!("上传接口: http://{}/upload/init", addr);
    info!("健康检查: http://{}/health", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let server = axum::serve(listener, app);

    tokio::select! {
        result = server => {
            if let Err(e) = result {
                tracing::error!("服务器错误: {}", e);
            }
        }
        _ = shutdown_signal() => {}
    }

    // 优雅关闭：停掉会话回收器
    shutdown.cancel();
    let _ = reaper_handle.await;
    info!("应用已安全退出");

    Ok(())
}
