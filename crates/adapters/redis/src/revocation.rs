//! Redis 令牌版本计数器
//!
//! 键：`{prefix}:token:version:{subject}`，值为整数版本，带 TTL。
//! 读取并初始化、递增都用 Lua 脚本保证原子性，多个实例共享同一计数器。
//! 会话截止时间存放在 `{prefix}:token:invalid_after:{subject}`，值为 Unix 秒。

use async_trait::async_trait;
use horizon_common::UserId;
use horizon_errors::{AppError, AppResult};
use horizon_ports::RevocationStore;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use std::time::Duration;
use tracing::debug;

/// 不存在时置 1；存在时保持原值。两种情况都刷新 TTL
const GET_OR_INIT_SCRIPT: &str = r"
local current = redis.call('GET', KEYS[1])
if not current then
    redis.call('SET', KEYS[1], 1, 'EX', ARGV[1])
    return 1
end
redis.call('EXPIRE', KEYS[1], ARGV[1])
return tonumber(current)
";

/// 不存在时视为 1 再递增，并刷新 TTL
const INCREMENT_SCRIPT: &str = r"
if redis.call('EXISTS', KEYS[1]) == 0 then
    redis.call('SET', KEYS[1], 1)
end
local current = redis.call('INCR', KEYS[1])
redis.call('EXPIRE', KEYS[1], ARGV[1])
return current
";

/// Redis 版本计数器
#[derive(Clone)]
pub struct RedisRevocationStore {
    conn: ConnectionManager,
    key_prefix: Option<String>,
    get_or_init: Script,
    increment: Script,
}

impl RedisRevocationStore {
    pub fn new(conn: ConnectionManager, key_prefix: Option<String>) -> Self {
        Self {
            conn,
            key_prefix,
            get_or_init: Script::new(GET_OR_INIT_SCRIPT),
            increment: Script::new(INCREMENT_SCRIPT),
        }
    }

    /// 获取带前缀的键
    pub fn version_key(&self, subject: &UserId) -> String {
        version_key(self.key_prefix.as_deref(), subject)
    }
}

fn version_key(prefix: Option<&str>, subject: &UserId) -> String {
    token_key(prefix, "version", subject)
}

fn invalid_after_key(prefix: Option<&str>, subject: &UserId) -> String {
    token_key(prefix, "invalid_after", subject)
}

fn token_key(prefix: Option<&str>, kind: &str, subject: &UserId) -> String {
    match prefix {
        Some(prefix) => format!("{}:token:{}:{}", prefix, kind, subject),
        None => format!("token:{}:{}", kind, subject),
    }
}

/// EXPIRE 不接受 0，最少 1 秒
fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
impl RevocationStore for RedisRevocationStore {
    async fn get_or_init(&self, subject: &UserId, ttl: Duration) -> AppResult<i64> {
        let mut conn = self.conn.clone();
        let version: i64 = self
            .get_or_init
            .key(self.version_key(subject))
            .arg(ttl_secs(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| AppError::external_service(format!("Redis get_or_init failed: {}", e)))?;

        debug!(user_id = %subject, version, "Token version loaded");
        Ok(version)
    }

    async fn current(&self, subject: &UserId) -> AppResult<Option<i64>> {
        let mut conn = self.conn.clone();
        conn.get(self.version_key(subject))
            .await
            .map_err(|e| AppError::external_service(format!("Redis get version failed: {}", e)))
    }

    async fn increment(&self, subject: &UserId, ttl: Duration) -> AppResult<i64> {
        let mut conn = self.conn.clone();
        self.increment
            .key(self.version_key(subject))
            .arg(ttl_secs(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| AppError::external_service(format!("Redis increment failed: {}", e)))
    }

    async fn set_invalid_after(&self, subject: &UserId, at: i64, ttl: Duration) -> AppResult<()> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(
            invalid_after_key(self.key_prefix.as_deref(), subject),
            at,
            ttl_secs(ttl),
        )
        .await
        .map_err(|e| AppError::external_service(format!("Redis set invalid_after failed: {}", e)))
    }

    async fn invalid_after(&self, subject: &UserId) -> AppResult<Option<i64>> {
        let mut conn = self.conn.clone();
        conn.get(invalid_after_key(self.key_prefix.as_deref(), subject))
            .await
            .map_err(|e| AppError::external_service(format!("Redis get invalid_after failed: {}", e)))
    }
}
