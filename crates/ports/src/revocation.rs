//! 令牌版本计数器与会话截止时间

use async_trait::async_trait;
use horizon_common::UserId;
use horizon_errors::AppResult;
use std::time::Duration;

/// 按主体存储的令牌版本计数器
///
/// 计数器单调递增，带 TTL；`increment` 必须是原子操作。
#[async_trait]
pub trait RevocationStore: Send + Sync {
    /// 读取当前版本，不存在时初始化为 1；两种情况都会刷新 TTL
    async fn get_or_init(&self, subject: &UserId, ttl: Duration) -> AppResult<i64>;

    /// 读取当前版本，不存在时返回 `None`
    async fn current(&self, subject: &UserId) -> AppResult<Option<i64>>;

    /// 原子递增版本并返回新值；不存在时视为 1 再递增
    async fn increment(&self, subject: &UserId, ttl: Duration) -> AppResult<i64>;

    /// 记录会话截止时间（Unix 秒）：签发时间不晚于该值的访问令牌失效
    async fn set_invalid_after(&self, subject: &UserId, at: i64, ttl: Duration) -> AppResult<()>;

    /// 读取会话截止时间，未设置时返回 `None`
    async fn invalid_after(&self, subject: &UserId) -> AppResult<Option<i64>>;
}
