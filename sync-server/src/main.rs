use std::time::Duration;

use sync_server::{BackgroundTasks, Config, ServerState, init_logger_with_file};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. 设置环境 (dotenv, 日志)
    dotenv::dotenv().ok();
    let log_level = std::env::var("LOG_LEVEL").ok();
    let log_dir = std::env::var("LOG_DIR").ok();
    init_logger_with_file(log_level.as_deref(), log_dir.as_deref());

    tracing::info!("Sync Server starting...");

    // 2. 加载配置
    let config = Config::from_env();
    tracing::info!(environment = %config.environment, "Configuration loaded");

    // 3. 初始化服务器状态并启动后台任务
    let state = ServerState::initialize(&config);
    let mut tasks = BackgroundTasks::new();
    state.start_background_tasks(&mut tasks);
    tracing::info!(tasks = tasks.len(), "Background tasks started");

    // 4. 等待关闭信号
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    // 5. 排空事件队列后优雅关闭
    let drain = state.bus.flush();
    if tokio::time::timeout(
        Duration::from_millis(config.shutdown_timeout_ms),
        drain,
    )
    .await
    .is_err()
    {
        tracing::warn!("Event queue drain timed out, shutting down anyway");
    }
    tasks.shutdown().await;
    tracing::info!("Sync Server stopped");

    Ok(())
}
