//! Redis 连接管理

use horizon_errors::{AppError, AppResult};
use redis::Client;
use redis::aio::ConnectionManager;

/// 创建 Redis 连接管理器
pub async fn create_connection_manager(url: &str) -> AppResult<ConnectionManager> {
    let client = Client::open(url)
        .map_err(|e| AppError::configuration(format!("Invalid Redis URL: {}", e)))?;

    ConnectionManager::new(client).await.map_err(|e| {
        AppError::external_service(format!("Failed to create Redis connection manager: {}", e))
    })
}

/// 检查 Redis 连接
pub async fn check_connection(conn: &ConnectionManager) -> AppResult<()> {
    let mut conn = conn.clone();
    redis::cmd("PING")
        .query_async::<String>(&mut conn)
        .await
        .map_err(|e| AppError::external_service(format!("Redis health check failed: {}", e)))?;
    Ok(())
}
