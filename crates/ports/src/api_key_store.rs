//! API Key 持久化

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use horizon_common::{ApiKeyId, TenantId, UserId};
use horizon_errors::AppResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// API Key 状态
///
/// `Revoked` 是终态；`Expired` 通常由校验时根据 `expire_time` 推导，不一定落库。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApiKeyStatus {
    Active,
    Revoked,
    Expired,
}

impl ApiKeyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Revoked => "REVOKED",
            Self::Expired => "EXPIRED",
        }
    }
}

impl fmt::Display for ApiKeyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApiKeyStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(Self::Active),
            "REVOKED" => Ok(Self::Revoked),
            "EXPIRED" => Ok(Self::Expired),
            other => Err(format!("Unknown API key status: {}", other)),
        }
    }
}

/// 已持久化的 API Key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiKeyRecord {
    /// 存储内部主键
    pub id: i64,
    pub uuid: ApiKeyId,
    pub key_prefix: String,
    pub key_hash: String,
    pub owner_user_id: UserId,
    /// `None` 表示个人 Key
    pub organization_id: Option<TenantId>,
    pub description: Option<String>,
    pub scopes: BTreeSet<String>,
    pub status: ApiKeyStatus,
    pub expire_time: Option<DateTime<Utc>>,
    pub last_used_time: Option<DateTime<Utc>>,
    pub last_used_ip: Option<String>,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

/// 待插入的 API Key
#[derive(Debug, Clone)]
pub struct NewApiKey {
    pub uuid: ApiKeyId,
    pub key_prefix: String,
    pub key_hash: String,
    pub owner_user_id: UserId,
    pub organization_id: Option<TenantId>,
    pub description: Option<String>,
    pub scopes: BTreeSet<String>,
    pub expire_time: Option<DateTime<Utc>>,
    pub create_time: DateTime<Utc>,
}

/// 可修改的 API Key 字段（整体覆盖写入）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiKeyDetails {
    pub description: Option<String>,
    pub scopes: BTreeSet<String>,
    pub expire_time: Option<DateTime<Utc>>,
}

/// API Key 存储
///
/// `key_hash` 全局唯一，插入冲突返回 `AppError::Conflict`。
#[async_trait]
pub trait ApiKeyStore: Send + Sync {
    /// 插入新 Key，返回带存储主键的记录
    async fn insert(&self, key: NewApiKey) -> AppResult<ApiKeyRecord>;

    /// 按哈希查找（任意状态）
    async fn find_by_hash(&self, key_hash: &str) -> AppResult<Option<ApiKeyRecord>>;

    /// 按公开标识查找
    async fn find_by_uuid(&self, id: &ApiKeyId) -> AppResult<Option<ApiKeyRecord>>;

    /// 用户创建的全部 Key，按创建时间倒序
    async fn list_by_owner(&self, owner: &UserId) -> AppResult<Vec<ApiKeyRecord>>;

    /// 组织下的全部 Key，按创建时间倒序
    async fn list_by_organization(&self, tenant: &TenantId) -> AppResult<Vec<ApiKeyRecord>>;

    /// 标记为 REVOKED；已撤销的 Key 保持不变
    async fn revoke(&self, id: &ApiKeyId, at: DateTime<Utc>) -> AppResult<()>;

    /// 覆盖描述、scope 与过期时间
    async fn update_details(
        &self,
        id: &ApiKeyId,
        details: &ApiKeyDetails,
        at: DateTime<Utc>,
    ) -> AppResult<()>;

    /// 记录最近使用时间与来源 IP（后写覆盖）
    async fn touch_last_used(
        &self,
        id: &ApiKeyId,
        ip: Option<&str>,
        at: DateTime<Utc>,
    ) -> AppResult<()>;
}
